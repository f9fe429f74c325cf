//! 仓库层
//!
//! 每个实体一个 trait，调用方传入显式 ID、拿回值对象。
//! 生产环境使用 PostgreSQL 实现，回放与测试使用 [`memory`] 下的内存实现。

pub mod directory_repo;
pub mod memory;
pub mod punishment_repo;
pub mod room_config_repo;

pub use directory_repo::{Directory, PgDirectory};
pub use memory::{InMemoryDirectory, InMemoryPunishmentRepository, InMemoryRoomConfigStore};
pub use punishment_repo::{PgPunishmentRepository, PunishmentRepository};
pub use room_config_repo::{PgRoomConfigStore, RoomConfigResolver, RoomConfigStore};
