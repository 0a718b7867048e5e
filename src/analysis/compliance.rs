//! Deterministic review of an execution record.
//!
//! Checks the record against what the submitter asked for: was the target
//! reached, were the required captures taken. The report is embedded in
//! the analysis prompt and doubles as the fallback analysis text when no
//! model is reachable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{ExecutionResult, TestConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub success: bool,
    pub steps_completed: usize,
    pub screenshots_captured: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotCompliance {
    pub required: usize,
    pub captured: usize,
    pub meets_requirements: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceCheck {
    pub target_url_accessed: bool,
    pub screenshots_captured: ScreenshotCompliance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewReport {
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub execution_summary: ExecutionSummary,
    pub compliance_check: ComplianceCheck,
    pub recommendations: Vec<String>,
}

pub fn review(config: &TestConfig, result: &ExecutionResult) -> ReviewReport {
    let url_accessed = result.execution_steps.iter().any(|step| {
        step.action.to_lowercase().contains("navigate") || step.action.contains(&config.target_url)
    });

    let required = config.effective_screenshots().len();
    let captured = result.screenshots.len();
    let meets_requirements = required == 0 || captured >= required;

    let mut recommendations = Vec::new();
    if !result.success {
        recommendations.push("Task execution failed - check error logs".to_string());
    }
    if !url_accessed {
        recommendations.push(format!(
            "Target URL {} may not have been properly accessed",
            config.target_url
        ));
    }
    if required > 0 && captured < required {
        recommendations.push("Not all required screenshots were captured".to_string());
    }
    if result.success && url_accessed {
        recommendations.push("Task appears to have completed successfully".to_string());
        if captured > 0 {
            recommendations.push(format!("Successfully captured {captured} screenshots"));
        }
    }

    ReviewReport {
        task_id: result.task_id.clone(),
        timestamp: Utc::now(),
        execution_summary: ExecutionSummary {
            success: result.success,
            steps_completed: result.execution_steps.len(),
            screenshots_captured: captured,
            error: result.error.clone(),
        },
        compliance_check: ComplianceCheck {
            target_url_accessed: url_accessed,
            screenshots_captured: ScreenshotCompliance {
                required,
                captured,
                meets_requirements,
            },
        },
        recommendations,
    }
}

impl ReviewReport {
    /// Plain-text rendering used when no analysis model is reachable.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Test Review: {}\n\n", self.task_id));
        out.push_str("## Execution Summary\n");
        out.push_str(&format!(
            "- success: {}\n- steps completed: {}\n- screenshots captured: {}\n",
            self.execution_summary.success,
            self.execution_summary.steps_completed,
            self.execution_summary.screenshots_captured,
        ));
        if let Some(error) = &self.execution_summary.error {
            out.push_str(&format!("- error: {error}\n"));
        }
        out.push_str("\n## Compliance\n");
        out.push_str(&format!(
            "- target URL accessed: {}\n- screenshots: {}/{} required ({})\n",
            self.compliance_check.target_url_accessed,
            self.compliance_check.screenshots_captured.captured,
            self.compliance_check.screenshots_captured.required,
            if self.compliance_check.screenshots_captured.meets_requirements {
                "meets requirements"
            } else {
                "below requirements"
            },
        ));
        out.push_str("\n## Recommendations\n");
        for rec in &self.recommendations {
            out.push_str(&format!("- {rec}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ExecutionStep, ScreenshotInstruction};

    fn result_with(steps: Vec<ExecutionStep>, screenshots: Vec<String>) -> ExecutionResult {
        ExecutionResult {
            task_id: "task_r".to_string(),
            success: true,
            timestamp: Utc::now(),
            task_details: TestConfig::new("https://example.com", "verify"),
            execution_steps: steps,
            screenshots,
            conversation: vec![],
            error: None,
            log_file: None,
        }
    }

    fn step(action: &str) -> ExecutionStep {
        ExecutionStep {
            step_number: 1,
            action: action.to_string(),
            result: "ok".to_string(),
            timestamp: Utc::now(),
            screenshot: None,
        }
    }

    #[test]
    fn test_detects_target_access() {
        let config = TestConfig::new("https://example.com", "verify");
        let good = review(
            &config,
            &result_with(vec![step("navigate to https://example.com")], vec![]),
        );
        assert!(good.compliance_check.target_url_accessed);

        let bad = review(&config, &result_with(vec![step("find text 'hi'")], vec![]));
        assert!(!bad.compliance_check.target_url_accessed);
        assert!(bad
            .recommendations
            .iter()
            .any(|r| r.contains("may not have been properly accessed")));
    }

    #[test]
    fn test_screenshot_requirements() {
        let mut config = TestConfig::new("https://example.com", "verify");
        config.screenshot_instructions = vec![
            ScreenshotInstruction {
                step_description: "home".to_string(),
                filename: "home.png".to_string(),
            },
            ScreenshotInstruction {
                step_description: "about".to_string(),
                filename: "about.png".to_string(),
            },
        ];

        let short = review(
            &config,
            &result_with(vec![step("navigate")], vec!["/screenshots/home.png".to_string()]),
        );
        assert!(!short.compliance_check.screenshots_captured.meets_requirements);
        assert_eq!(short.compliance_check.screenshots_captured.required, 2);
        assert!(short
            .recommendations
            .iter()
            .any(|r| r.contains("Not all required screenshots")));

        let none_required = review(
            &TestConfig::new("https://example.com", "verify"),
            &result_with(vec![step("navigate")], vec![]),
        );
        assert!(none_required
            .compliance_check
            .screenshots_captured
            .meets_requirements);
    }

    #[test]
    fn test_render_text_mentions_everything() {
        let config = TestConfig::new("https://example.com", "verify");
        let report = review(
            &config,
            &result_with(vec![step("navigate")], vec!["/screenshots/a.png".to_string()]),
        );
        let text = report.render_text();
        assert!(text.contains("Execution Summary"));
        assert!(text.contains("Compliance"));
        assert!(text.contains("Recommendations"));
        assert!(text.contains("task_r"));
    }
}
