//! Client-side view of the relay: trajectory history, flat map projection,
//! and a raster renderer that follows one entity.

pub mod kinematics;
pub mod projection;
pub mod renderer;
pub mod surface;
pub mod trajectory;

pub use kinematics::{Kinematics, MovementStatus};
pub use projection::{GeoPoint, PixelPoint, ViewState, project, unproject};
pub use renderer::{RenderStyle, Renderer};
pub use surface::{Color, Stroke, Surface, SurfaceError};
pub use trajectory::{DEFAULT_TRAJECTORY_LIMIT, TrackedEntity, TrajectoryStore};
