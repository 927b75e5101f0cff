pub mod bar_aggregator;
pub mod intraday;
pub mod master;
pub mod replay;
pub mod tick_source;
