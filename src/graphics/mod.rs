pub mod compositor;
pub mod engine;
pub mod mapping;
pub mod raster;
pub mod regions;

pub use compositor::compose;
pub use engine::{frame_delay, RenderLoop};
pub use mapping::{led_positions, sample_device, Layout};
pub use raster::RasterBuffer;
pub use regions::{Region, RegionId, RegionRecord, RegionRegistry};
