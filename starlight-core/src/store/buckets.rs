//! Logical bucket names (§6, "Persistence"). Each is a `sled::Tree`, opened
//! once when the [`super::DurableStore`] is constructed.

pub const CONFIG: &str = "config";
pub const WALLET: &str = "wallet";
pub const CHANNELS: &str = "channels";
pub const TASKS: &str = "tasks";
pub const ENCRYPTED_SEED: &str = "encrypted_seed";
pub const NEXT_KEY_INDEX: &str = "next_key_index";
pub const PRIMARY_ACCOUNT: &str = "primary_account";
/// Ambient addition beyond §6's bucket list: the append-only log of update
/// records (§3, "Update record (observable log)"). Not part of the spec's
/// transactional contract but a natural extra bucket under it -- see
/// DESIGN.md.
pub const UPDATES: &str = "updates";

/// The single key used inside a singleton bucket (`config`, `wallet`,
/// `encrypted_seed`, `next_key_index`, `primary_account` each hold exactly
/// one logical value).
pub const SINGLETON_KEY: &[u8] = b"_";
