mod codec;
mod desc;
mod instance;
mod sharding;
mod tokens;

pub use codec::{Codec, JsonCodec};
pub use desc::{RingDesc, RingStats};
pub use instance::{InstanceDesc, InstanceState};
pub use sharding::{hash_key, ShardingStrategy, TokenRange, TokenRangeStrategy};
pub use tokens::{generate_tokens, Tokens};
