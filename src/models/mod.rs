//! Domain models for the crawler.

mod aoi;
mod listing;
mod response;
mod task;
mod tile;

pub use aoi::{Aoi, AoiFlag, AoiFlags, NewAoi};
pub use listing::{Listing, ListingResource, Registration, Relocation};
pub use response::{NewResponse, ResponseRecord, ResponseType};
pub use task::{InvalidTransition, NewTask, Task, TaskEvent, TaskGroup, TaskStatus};
pub use tile::{NewTile, Tile, UNKNOWN_COUNT};
