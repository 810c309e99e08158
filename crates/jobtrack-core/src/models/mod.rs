//! Data models for job application entities.
//!
//! These are payloads carried by authorized requests; the session layer
//! never inspects them.
//!
//! - `JobApplication`, `ApplicationStatus`: tracked applications
//! - `AiAnalysis`: AI review of an application against its job posting

pub mod application;

pub use application::{AiAnalysis, ApplicationStatus, JobApplication, NewApplication};
