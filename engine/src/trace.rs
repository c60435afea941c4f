use std::fmt;

/// Collects a description of what a pending promise is waiting on, one
/// entry per node, outermost first.
#[derive(Debug, Default, Clone)]
pub struct TraceBuilder {
    entries: Vec<String>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        TraceBuilder::default()
    }

    pub fn add<S: Into<String>>(&mut self, entry: S) {
        self.entries.push(entry.into());
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for TraceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "  {entry}")?;
        }
        Ok(())
    }
}

#[test]
fn test_trace_builder_display() {
    let mut builder = TraceBuilder::new();
    assert!(builder.is_empty());
    builder.add("outer");
    builder.add(String::from("inner"));
    assert_eq!(builder.to_string(), "  outer\n  inner\n");
}
