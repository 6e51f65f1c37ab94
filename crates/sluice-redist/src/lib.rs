#![warn(missing_docs)]

//! Sluice redistribution subsystem.
//!
//! Reshuffles records held across a group of source ranks into chunks
//! delivered to a group of destination ranks, using one of several
//! splitting strategies and either a collective or a point-to-point
//! transport discipline.

pub mod block;
pub mod channel;
pub mod config;
pub mod error;
pub mod fields;
pub mod morton;
pub mod record;
pub mod split;
pub mod window;

pub use block::BlockDomain;
pub use channel::{ChannelLayout, Delivery, RedistributionChannel};
pub use config::{Discipline, RedistConfig, StrategyConfig, ZCurveMapping};
pub use error::{RedistError, RedistResult};
pub use fields::{Field, FieldRecord, FieldValue, MergeRule};
pub use record::{ItemSpan, Record, Selection};
pub use split::Strategy;
pub use window::GlobalIndexWindow;
