//! Run-wide primitives shared by every component

pub mod time;
