//! Redis-specific advisory lock primitives: a `SET NX PX`-leased lock with
//! a random token and a Lua compare-and-delete release, so a peer whose
//! lease already expired can never release a lock acquired by someone
//! else in the meantime (spec §5, §9).

use redis::Script;
use uuid::Uuid;

/// Releases the lock only if its current value still matches our token.
/// Classic single-instance Redlock-style release script.
pub const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

pub fn release_script() -> Script {
    Script::new(RELEASE_SCRIPT)
}

/// A fresh, opaque lock token. Random per acquisition so a delayed release
/// from a prior lease can never delete a newer holder's key.
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}
