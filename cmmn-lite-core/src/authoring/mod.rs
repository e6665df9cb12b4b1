//! Case model authoring pipeline: YAML → DTO → validate → resolved model,
//! plus best-effort diagram synthesis for deployments.

pub mod diagram;
pub mod dto;
pub mod dto_to_model;
pub mod validate;
pub mod yaml;
