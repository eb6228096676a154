use async_trait::async_trait;

use super::errors::parse_redis_error;
use super::pool::PooledConnection;
use super::provider::Transport;
use crate::core::command::Cmd;
use crate::proto::frame::Frame;
use crate::Result;

/// Sends commands over pooled RESP connections.
///
/// Error replies become typed errors through [`parse_redis_error`], so the
/// executor sees `MOVED` and `ASK` as redirects. A connection that failed
/// at the IO level is marked broken and never returns to its pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct RespTransport;

#[async_trait]
impl Transport<PooledConnection> for RespTransport {
    async fn execute(&self, connection: &mut PooledConnection, cmd: &Cmd) -> Result<Frame> {
        match connection.send(cmd.to_frame()).await {
            Ok(Frame::Error(msg)) => Err(parse_redis_error(&msg)),
            Ok(frame) => Ok(frame),
            Err(e) => {
                if e.is_connection_failure() {
                    connection.mark_broken();
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ConnectionPool, NodeAddress, PoolConfig};
    use crate::testing::FakeNode;
    use crate::Error;

    #[tokio::test]
    async fn test_reply_and_redirect_mapping() {
        let node = FakeNode::spawn(|_, args| match args[0].as_ref() {
            b"GET" => Frame::bulk("v"),
            _ => Frame::Error(b"MOVED 12182 127.0.0.1:7005".to_vec()),
        })
        .await;
        let pool = ConnectionPool::new(node.address().clone(), PoolConfig::default());
        let mut conn = pool.get().await.unwrap();

        let reply = RespTransport
            .execute(&mut conn, &Cmd::new("GET").key("foo"))
            .await
            .unwrap();
        assert_eq!(reply, Frame::bulk("v"));

        let err = RespTransport
            .execute(&mut conn, &Cmd::new("SET").key("foo").arg("v"))
            .await
            .unwrap_err();
        match err {
            Error::Moved { slot, address } => {
                assert_eq!(slot, 12182);
                assert_eq!(address, NodeAddress::new("127.0.0.1", 7005));
            }
            other => panic!("expected Moved, got {:?}", other),
        }
        assert!(!conn.is_broken());
    }

    #[tokio::test]
    async fn test_io_failure_marks_broken() {
        let node = FakeNode::spawn(|_, _| Frame::simple("OK")).await;
        let pool = ConnectionPool::new(node.address().clone(), PoolConfig::default());
        let mut conn = pool.get().await.unwrap();
        // The session only exists once the node has answered something.
        RespTransport
            .execute(&mut conn, &Cmd::new("PING"))
            .await
            .unwrap();
        node.disconnect_all();

        let err = RespTransport
            .execute(&mut conn, &Cmd::new("PING"))
            .await
            .unwrap_err();
        assert!(err.is_connection_failure());
        assert!(conn.is_broken());
    }
}
