//! Day and night light over loaded blocks
//!
//! Light is stored per node in two 4-bit banks. Sunlight (level 15) falls
//! straight down through nodes that let sunlight through; every other light
//! loses one level per face step. Changes are applied with two bucket
//! queues: light that lost its support is removed brightest first, then
//! every surviving source spreads again.
//!
//! - `update`: incremental relighting after single node changes
//! - `bulk`: from-scratch lighting of generator output and block repair
//! - `border`: reconciliation across seams of blocks lit separately

pub mod border;
pub mod bulk;
pub mod queue;
pub mod update;

pub use border::update_block_border_lighting;
pub use bulk::{blit_back_with_light, repair_block_light};
pub use queue::{LightQueue, ReLightQueue, UnlightQueue};
pub use update::{is_sunlight_above, spread_light, unspread_light, update_lighting_nodes};
