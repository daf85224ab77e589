use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

impl Validate for Config {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.groups.is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "no-groups",
                message: "config declares no groups".to_string(),
            });
        }

        let mut seen_ids = std::collections::HashSet::new();
        for group in &self.groups {
            if !seen_ids.insert(group.id.as_str()) {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "duplicate-group-id",
                    message: format!("group id '{}' is declared more than once", group.id),
                });
            }
            if group.targets.is_empty() {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Warning,
                    code: "empty-group",
                    message: format!("group '{}' has no targets", group.id),
                });
            }
            for dep in &group.depends_on {
                if dep == &group.id {
                    issues.push(ValidationIssue {
                        level: ValidationLevel::Error,
                        code: "self-dependency",
                        message: format!("group '{}' depends on itself", group.id),
                    });
                }
            }
            for target in &group.targets {
                if !target.repo.contains('/') {
                    issues.push(ValidationIssue {
                        level: ValidationLevel::Error,
                        code: "malformed-repo",
                        message: format!(
                            "target repo '{}' in group '{}' must be 'owner/name'",
                            target.repo, group.id
                        ),
                    });
                }
            }
        }

        for group in &self.groups {
            for dep in &group.depends_on {
                if !seen_ids.contains(dep.as_str()) {
                    issues.push(ValidationIssue {
                        level: ValidationLevel::Error,
                        code: "non-existent-dependency",
                        message: format!(
                            "group '{}' depends on non-existent group '{}'",
                            group.id, dep
                        ),
                    });
                }
            }
        }

        issues
    }
}
