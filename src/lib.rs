pub mod catalog;
pub mod comfy_table;
pub mod config;
pub mod enrich;
pub mod error;
pub mod gecko;
pub mod http;
pub mod indicators;
pub mod klines;
pub mod llama;
pub mod logging;
pub mod market;
pub mod ohlc;
pub mod pipeline;
pub mod sheet;
pub mod storage_utils;
pub mod symbols;
