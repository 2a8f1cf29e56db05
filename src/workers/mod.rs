pub mod correlation_sweeper;
