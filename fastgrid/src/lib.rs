#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

//! `fastgrid` builds interpolation tables of perturbative cross sections.
//!
//! A table is created in two passes over the same event generator. In the calibration pass a
//! [`filler::TableCreator`] only records the momentum fractions and scales seen in each bin; the
//! resulting [`warmup::WarmupTable`] fixes the limits of the node grids. In the production pass
//! the events are interpolated onto these grids and accumulated into coefficients, which can be
//! normalized, merged with those of other runs and written to disk as a [`table::Table`].

mod convert;

pub mod bin;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod filler;
pub mod interpolation;
pub mod nodes;
pub mod process;
pub mod table;
pub mod tensor;
pub mod warmup;
