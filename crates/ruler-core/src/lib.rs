pub mod config;
pub mod error;
pub mod kv;
pub mod ring;

pub use config::RulerConfig;
pub use error::{Result, RulerError};
pub use kv::{CasOutcome, KvStore, Versioned};
pub use ring::{
    generate_tokens, hash_key, Codec, InstanceDesc, InstanceState, JsonCodec, RingDesc, RingStats,
    ShardingStrategy, TokenRange, TokenRangeStrategy, Tokens,
};
