pub mod config;
pub mod docx;
pub mod models;
pub mod paraphrase;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod similarity;
pub mod textutil;
