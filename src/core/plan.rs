//! Extraction and validation of the planner worker's output.
//!
//! The planner is asked for bare JSON but models routinely wrap it in code
//! fences or prose. The routine here is deterministic: strip fences, locate
//! the outermost balanced object, decode, validate the schema, fail fast.

use super::task::Phase;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no JSON object found in planner output")]
    NoJsonObject,
    #[error("planner output is not a valid plan: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("plan contains no phases")]
    EmptyPhases,
    #[error("phase {0} has no experts")]
    EmptyExperts(String),
    #[error("phase {index} is missing required field '{field}'")]
    MissingPhaseField { index: usize, field: &'static str },
    #[error("expert '{role}' in phase {phase} is missing required field '{field}'")]
    MissingExpertField {
        phase: String,
        role: String,
        field: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default)]
    phases: Vec<Phase>,
}

/// Parses a planner reply into an ordered list of phases.
///
/// Phases come back with every runtime field (statuses, timestamps,
/// results) at its default; the scheduler owns those from here on.
pub fn parse_plan(raw: &str) -> Result<Vec<Phase>, PlanError> {
    let json = extract_object(raw).ok_or(PlanError::NoJsonObject)?;
    let plan: PlanResponse = serde_json::from_str(json)?;
    validate(&plan.phases)?;
    Ok(plan.phases)
}

/// Returns the outermost balanced `{ ... }` region of `raw`, after
/// stripping a surrounding markdown code fence if present.
fn extract_object(raw: &str) -> Option<&str> {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the fence language tag line and the closing fence.
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
        text = body.rsplit_once("```").map(|(b, _)| b).unwrap_or(body);
        text = text.trim();
    }

    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn validate(phases: &[Phase]) -> Result<(), PlanError> {
    if phases.is_empty() {
        return Err(PlanError::EmptyPhases);
    }
    for (index, phase) in phases.iter().enumerate() {
        let missing = |field| PlanError::MissingPhaseField { index, field };
        if phase.id.trim().is_empty() {
            return Err(missing("id"));
        }
        if phase.name.trim().is_empty() {
            return Err(missing("name"));
        }
        if phase.description.trim().is_empty() {
            return Err(missing("description"));
        }
        if phase.experts.is_empty() {
            return Err(PlanError::EmptyExperts(phase.id.clone()));
        }
        for expert in &phase.experts {
            let missing = |field| PlanError::MissingExpertField {
                phase: phase.id.clone(),
                role: expert.role.clone(),
                field,
            };
            if expert.role.trim().is_empty() {
                return Err(missing("role"));
            }
            if expert.expertise.trim().is_empty() {
                return Err(missing("expertise"));
            }
            if expert.persona.trim().is_empty() {
                return Err(missing("persona"));
            }
            if expert.task.trim().is_empty() {
                return Err(missing("task"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::{ExpertStatus, PhaseStatus};

    const VALID_PLAN: &str = r#"{
        "phases": [
            {
                "id": "phase_1_planning",
                "name": "Initial Design",
                "description": "Define the architecture.",
                "experts": [
                    {
                        "role": "Lead Architect",
                        "expertise": "System design",
                        "persona": "You are a lead architect. Do not delegate.",
                        "task": "Create an architecture document."
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn parses_bare_json() {
        let phases = parse_plan(VALID_PLAN).unwrap();
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].id, "phase_1_planning");
        assert_eq!(phases[0].status, PhaseStatus::Pending);
        assert_eq!(phases[0].experts[0].status, ExpertStatus::Pending);
    }

    #[test]
    fn strips_code_fences() {
        let fenced = format!("```json\n{}\n```", VALID_PLAN);
        let phases = parse_plan(&fenced).unwrap();
        assert_eq!(phases.len(), 1);
    }

    #[test]
    fn ignores_surrounding_prose() {
        let wrapped = format!("Here is the plan you asked for:\n{}\nLet me know!", VALID_PLAN);
        assert_eq!(parse_plan(&wrapped).unwrap().len(), 1);
    }

    #[test]
    fn braces_inside_strings_do_not_break_extraction() {
        let tricky = VALID_PLAN.replace(
            "Create an architecture document.",
            "Use the {\\\"format\\\": \\\"c4\\\"} convention { everywhere }.",
        );
        assert_eq!(parse_plan(&tricky).unwrap().len(), 1);
    }

    #[test]
    fn zero_phases_is_invalid() {
        let err = parse_plan(r#"{"phases": []}"#).unwrap_err();
        assert!(matches!(err, PlanError::EmptyPhases));
    }

    #[test]
    fn phase_without_experts_is_invalid() {
        let plan = r#"{"phases": [{"id": "p1", "name": "n", "description": "d", "experts": []}]}"#;
        assert!(matches!(
            parse_plan(plan).unwrap_err(),
            PlanError::EmptyExperts(id) if id == "p1"
        ));
    }

    #[test]
    fn missing_expert_field_is_invalid() {
        let plan = r#"{"phases": [{"id": "p1", "name": "n", "description": "d",
            "experts": [{"role": "dev", "expertise": "", "persona": "p", "task": "t"}]}]}"#;
        assert!(matches!(
            parse_plan(plan).unwrap_err(),
            PlanError::MissingExpertField { field: "expertise", .. }
        ));
    }

    #[test]
    fn no_object_at_all() {
        assert!(matches!(
            parse_plan("I could not produce a plan.").unwrap_err(),
            PlanError::NoJsonObject
        ));
    }

    #[test]
    fn unbalanced_object_is_rejected() {
        assert!(matches!(
            parse_plan(r#"{"phases": [ "#).unwrap_err(),
            PlanError::NoJsonObject
        ));
    }
}
