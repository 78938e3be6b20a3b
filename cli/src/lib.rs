//! acb CLI - incremental ACI image builds.

pub mod commands;
pub mod output;
