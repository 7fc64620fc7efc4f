pub mod activity_log;
pub mod crawler;
pub mod exclusion;
pub mod indexing_engine;
pub mod pipeline;
pub mod query;
pub mod retry_worker;
pub mod search_engine;
pub mod throttle;
