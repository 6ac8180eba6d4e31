//! Collected script output.

/// Accumulates everything a script prints during one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputCollector {
    buffer: String,
}

impl OutputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Write `parts` joined by `sep` and terminated by `end`.
    pub fn print(&mut self, parts: &[String], sep: &str, end: &str) {
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                self.buffer.push_str(sep);
            }
            self.buffer.push_str(part);
        }
        self.buffer.push_str(end);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_joins_and_terminates() {
        let mut out = OutputCollector::new();
        out.print(&["a".into(), "b".into()], " ", "\n");
        out.print(&["c".into()], ",", "");
        assert_eq!(out.as_str(), "a b\nc");
        assert_eq!(out.len(), 5);
    }
}
