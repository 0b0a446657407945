use crate::utils::error::{MumuError, Result};
use std::collections::BTreeSet;

/// MuMuManager.exe accepts at most this many indices in one `--vmindex` list.
pub const MAX_INDICES_PER_COMMAND: usize = 100;
/// Upper bound on how many indices one index list may expand to.
pub const MAX_PARSED_INDICES: usize = 10_000;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(MumuError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(MumuError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(MumuError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MumuError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(MumuError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// CPU protection threshold in percent, within 1..=100.
pub fn validate_cpu_threshold(value: f32) -> Result<()> {
    if !value.is_finite() {
        return Err(MumuError::InvalidConfigValueError {
            field: "cpu_threshold".to_string(),
            value: value.to_string(),
            reason: "Threshold must be a finite number".to_string(),
        });
    }
    validate_range("cpu_threshold", value, 1.0, 100.0)
}

pub fn validate_indices(indices: &[u32]) -> Result<()> {
    if indices.is_empty() {
        return Err(MumuError::ValidationError {
            message: "No instance selected".to_string(),
        });
    }
    if indices.len() > MAX_INDICES_PER_COMMAND {
        return Err(MumuError::ValidationError {
            message: format!(
                "Too many instances selected ({}, maximum {})",
                indices.len(),
                MAX_INDICES_PER_COMMAND
            ),
        });
    }
    Ok(())
}

/// Parses index lists such as `1,2,5-8`. Duplicates are dropped, order is ascending.
pub fn parse_indices(input: &str) -> Result<Vec<u32>> {
    let mut indices = BTreeSet::new();

    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let invalid = || MumuError::InvalidConfigValueError {
            field: "indices".to_string(),
            value: part.to_string(),
            reason: "Expected a number or a range like 3-7".to_string(),
        };

        match part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start.trim().parse().map_err(|_| invalid())?;
                let end: u32 = end.trim().parse().map_err(|_| invalid())?;
                if start > end {
                    return Err(invalid());
                }
                let span = (end - start) as usize + 1;
                if indices.len() + span > MAX_PARSED_INDICES {
                    return Err(MumuError::ValidationError {
                        message: format!(
                            "Index list {} is too large (maximum {} instances)",
                            part, MAX_PARSED_INDICES
                        ),
                    });
                }
                indices.extend(start..=end);
            }
            None => {
                indices.insert(part.parse().map_err(|_| invalid())?);
            }
        }
    }

    if indices.is_empty() {
        return Err(MumuError::ValidationError {
            message: "No instance selected".to_string(),
        });
    }

    Ok(indices.into_iter().collect())
}

pub fn join_indices(indices: &[u32]) -> String {
    indices
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("batch_size", 5, 1).is_ok());
        assert!(validate_positive_number("batch_size", 0, 1).is_err());
    }

    #[test]
    fn test_parse_indices_with_ranges() {
        assert_eq!(parse_indices("1,3-5, 3").unwrap(), vec![1, 3, 4, 5]);
        assert!(parse_indices("5-3").is_err());
        assert!(parse_indices("a,b").is_err());
        assert!(parse_indices(" , ").is_err());
    }

    #[test]
    fn test_parse_indices_rejects_huge_ranges() {
        assert!(parse_indices("0-4294967295").is_err());
        assert!(parse_indices("0-3000000").is_err());
        assert!(parse_indices("0-5000,6000-11000").is_err());
        assert_eq!(parse_indices("0-9999").unwrap().len(), MAX_PARSED_INDICES);
    }

    #[test]
    fn test_validate_indices_limits() {
        assert!(validate_indices(&[]).is_err());
        assert!(validate_indices(&[0, 1, 2]).is_ok());
        let too_many: Vec<u32> = (0..=MAX_INDICES_PER_COMMAND as u32).collect();
        assert!(validate_indices(&too_many).is_err());
        assert_eq!(join_indices(&[1, 2, 10]), "1,2,10");
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("cpu_threshold", 70.0, 1.0, 100.0).is_ok());
        assert!(validate_range("cpu_threshold", 120.0, 1.0, 100.0).is_err());
    }

    #[test]
    fn test_validate_cpu_threshold() {
        assert!(validate_cpu_threshold(1.0).is_ok());
        assert!(validate_cpu_threshold(100.0).is_ok());
        for bad in [0.5, 100.5, f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            assert!(validate_cpu_threshold(bad).is_err(), "{} accepted", bad);
        }
    }
}
