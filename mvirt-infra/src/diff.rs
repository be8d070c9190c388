//! Normalized projections and field-by-field diffs.
//!
//! Each resource kind defines a projection with an explicit field list.
//! Desired and existing state are projected onto it and compared field by
//! field; server-populated fields never make it into a projection.

use std::fmt::{self, Debug};

/// A resource that can be projected onto its comparable fields.
pub trait Normalize {
    type Projection: Debug + Clone + PartialEq;

    fn normalize(&self) -> Self::Projection;
}

/// Field-wise comparison of two projections.
pub trait Compare {
    /// Differences between `self` (desired) and `existing`.
    fn diff(&self, existing: &Self) -> Diff;
}

/// One differing field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    pub field: &'static str,
    pub desired: String,
    pub existing: String,
}

/// Ordered list of differing fields. Empty means no mutating call is needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    fields: Vec<FieldDiff>,
}

impl Diff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `field` if `desired` and `existing` differ.
    pub fn field<T: PartialEq + Debug>(mut self, field: &'static str, desired: &T, existing: &T) -> Self {
        if desired != existing {
            self.fields.push(FieldDiff {
                field,
                desired: format!("{:?}", desired),
                existing: format!("{:?}", existing),
            });
        }
        self
    }

    /// Like [`Diff::field`], but an unset desired value accepts whatever the
    /// provider defaulted.
    pub fn optional<T: PartialEq + Debug>(
        self,
        field: &'static str,
        desired: &Option<T>,
        existing: &Option<T>,
    ) -> Self {
        if desired.is_none() {
            return self;
        }
        self.field(field, desired, existing)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDiff] {
        &self.fields
    }

    pub fn changed(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }
}

impl fmt::Display for Diff {
    /// `+desired -existing` per field.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.fields {
            writeln!(f, "  {}:", d.field)?;
            writeln!(f, "  + {}", d.desired)?;
            writeln!(f, "  - {}", d.existing)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_fields_are_not_recorded() {
        let diff = Diff::new()
            .field("count", &Some(3), &Some(3))
            .field("mode", &"System", &"System");
        assert!(diff.is_empty());
        assert_eq!(diff.to_string(), "");
    }

    #[test]
    fn test_differing_fields_in_order() {
        let diff = Diff::new()
            .field("count", &Some(5), &Some(3))
            .field("mode", &"System", &"System")
            .field("orchestrator_version", &Some("1.30.2"), &None);

        let names: Vec<_> = diff.fields().iter().map(|f| f.field).collect();
        assert_eq!(names, vec!["count", "orchestrator_version"]);
        assert!(diff.changed("count"));
        assert!(!diff.changed("mode"));

        let rendered = diff.to_string();
        assert!(rendered.contains("+ Some(5)"));
        assert!(rendered.contains("- Some(3)"));
    }

    #[test]
    fn test_optional_skips_unset_desired() {
        let diff = Diff::new()
            .optional("osType", &None::<&str>, &Some("Linux"))
            .optional("maxCount", &Some(5), &Some(3))
            .optional("minCount", &Some(1), &None);

        let names: Vec<_> = diff.fields().iter().map(|f| f.field).collect();
        assert_eq!(names, vec!["maxCount", "minCount"]);
    }
}
