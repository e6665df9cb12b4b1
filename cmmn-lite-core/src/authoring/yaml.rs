use anyhow::Result;

use super::dto::CaseModelDto;

/// Parse a YAML string into a CaseModelDto.
///
/// Validation is NOT performed here — the deployer runs `validate_dto()`
/// and converts to the resolved model afterwards.
pub fn parse_case_yaml(yaml_str: &str) -> Result<CaseModelDto> {
    let dto: CaseModelDto = serde_yaml::from_str(yaml_str)?;
    Ok(dto)
}
