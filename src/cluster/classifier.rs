use crate::core::command::Cmd;

/// Decides whether a command only reads data.
///
/// Keyless read-only commands may be served by any node, replicas included;
/// everything else goes to primaries.
pub trait CommandClassifier: Send + Sync {
    /// Returns true if `cmd` does not modify data.
    fn is_read_only(&self, cmd: &Cmd) -> bool;
}

impl<F> CommandClassifier for F
where
    F: Fn(&Cmd) -> bool + Send + Sync,
{
    fn is_read_only(&self, cmd: &Cmd) -> bool {
        self(cmd)
    }
}

/// Classifier backed by a fixed table of read-only commands.
///
/// Lookups are case-insensitive. Container commands are matched as
/// `NAME|SUBCOMMAND`; unknown commands count as writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCommandClassifier;

const READ_ONLY_COMMANDS: &[&str] = &[
    "BITCOUNT",
    "BITPOS",
    "DBSIZE",
    "DUMP",
    "ECHO",
    "EVALSHA_RO",
    "EVAL_RO",
    "EXISTS",
    "FCALL_RO",
    "GEODIST",
    "GEOHASH",
    "GEOPOS",
    "GEOSEARCH",
    "GET",
    "GETBIT",
    "GETRANGE",
    "HEXISTS",
    "HGET",
    "HGETALL",
    "HKEYS",
    "HLEN",
    "HMGET",
    "HSCAN",
    "HSTRLEN",
    "HVALS",
    "INFO",
    "KEYS",
    "LASTSAVE",
    "LCS",
    "LINDEX",
    "LLEN",
    "LPOS",
    "LRANGE",
    "MEMORY|USAGE",
    "MGET",
    "OBJECT|ENCODING",
    "OBJECT|FREQ",
    "OBJECT|IDLETIME",
    "OBJECT|REFCOUNT",
    "PFCOUNT",
    "PING",
    "PTTL",
    "RANDOMKEY",
    "SCAN",
    "SCARD",
    "SDIFF",
    "SINTER",
    "SINTERCARD",
    "SISMEMBER",
    "SMEMBERS",
    "SMISMEMBER",
    "SRANDMEMBER",
    "SSCAN",
    "STRLEN",
    "SUBSTR",
    "SUNION",
    "TIME",
    "TOUCH",
    "TTL",
    "TYPE",
    "XINFO|CONSUMERS",
    "XINFO|GROUPS",
    "XINFO|STREAM",
    "XLEN",
    "XPENDING",
    "XRANGE",
    "XREAD",
    "XREVRANGE",
    "ZCARD",
    "ZCOUNT",
    "ZDIFF",
    "ZINTER",
    "ZLEXCOUNT",
    "ZMSCORE",
    "ZRANDMEMBER",
    "ZRANGE",
    "ZRANGEBYLEX",
    "ZRANGEBYSCORE",
    "ZRANK",
    "ZREVRANGE",
    "ZREVRANGEBYLEX",
    "ZREVRANGEBYSCORE",
    "ZREVRANK",
    "ZSCAN",
    "ZSCORE",
    "ZUNION",
];

fn is_listed(name: &str) -> bool {
    READ_ONLY_COMMANDS.binary_search(&name).is_ok()
}

impl CommandClassifier for StaticCommandClassifier {
    fn is_read_only(&self, cmd: &Cmd) -> bool {
        let name = String::from_utf8_lossy(cmd.name()).to_ascii_uppercase();
        if let Some(sub) = cmd.subcommand() {
            let full = format!("{}|{}", name, String::from_utf8_lossy(sub).to_ascii_uppercase());
            if is_listed(&full) {
                return true;
            }
        }
        is_listed(&name)
    }
}
