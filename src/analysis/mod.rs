pub mod performance;

pub use performance::{AnalyzerOptions, PerformanceAnalyzer};
