//! Scene directory host: scene files as containers, plus a watcher that
//! reports container deletions and changes.

mod directory;
mod watcher;

pub use directory::{SceneDirectory, SceneFile, SceneObject};
pub use watcher::{ContainerEvent, EventCallback, SceneWatcher};
