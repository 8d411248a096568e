#![allow(dead_code)]

pub mod extractor;
pub mod index;
pub mod store;
