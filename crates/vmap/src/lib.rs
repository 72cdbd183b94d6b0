// VMap - static collision geometry queries
//
// Line of sight, ground height, area and liquid lookups against the
// precomputed model files of each map, plus collision proxies for spawned
// game objects.

pub mod assembler;
pub mod bih;
pub mod config;
pub mod coordinates;
pub mod error;
pub mod game_object_model;
pub mod geometry;
pub mod io;
pub mod manager;
pub mod map_tree;
pub mod model;
pub mod model_cache;
pub mod model_instance;
pub mod types;

pub use glam::{Quat, Vec3};

pub use config::VMapConfig;
pub use coordinates::TileCoord;
pub use error::{LoadResult, VmapError};
pub use game_object_model::{GameObjectModel, GameObjectModelData, GameObjectModelList, GameObjectModelOwner};
pub use manager::{DefaultVMapHooks, VMapHooks, VMapManager};
pub use model::WorldModel;
pub use model_cache::ModelCache;
pub use types::*;
