//! Recorded element streams
//!
//! An element stream is a JSON-lines file with one decoded element per line,
//! tagged with the trace-ID it was traced on:
//!
//! ```json
//! {"trace_id": 16, "element": {"type": "context_change", "exception_level": "EL0", "ctxt_id_valid": true, "context_id": 101}}
//! {"trace_id": 16, "element": {"type": "timestamp", "timestamp": 1000}}
//! {"trace_id": 16, "element": {"type": "instr_range", "st_addr": 4096, "en_addr": 4104, "last_instr_sz": 4, "last_instr_exec": true, "last_i_subtype": "branch_with_link"}}
//! ```
//!
//! Blank lines are skipped.

use etm_stack_common::TraceElement;
use serde::{Deserialize, Serialize};
use std::io::BufRead;

use crate::domain::{ElementError, TraceId};

/// One line of an element stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub trace_id: u8,
    pub element: TraceElement,
}

/// Iterator over the elements of a stream
pub struct ElementReader<R> {
    input: R,
    line: usize,
    buffer: String,
}

impl<R: BufRead> ElementReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: 0,
            buffer: String::new(),
        }
    }
}

impl<R: BufRead> Iterator for ElementReader<R> {
    type Item = Result<(TraceId, TraceElement), ElementError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buffer.clear();
            match self.input.read_line(&mut self.buffer) {
                Ok(0) => return None,
                Ok(_) => self.line += 1,
                Err(e) => return Some(Err(e.into())),
            }

            let text = self.buffer.trim();
            if text.is_empty() {
                continue;
            }
            return Some(
                serde_json::from_str::<ElementRecord>(text)
                    .map(|record| (TraceId(record.trace_id), record.element))
                    .map_err(|source| ElementError::Parse {
                        line: self.line,
                        source,
                    }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etm_stack_common::{InstrSubtype, PeContext};

    #[test]
    fn test_reads_elements_and_skips_blank_lines() {
        let input = "\
{\"trace_id\": 1, \"element\": {\"type\": \"context_change\", \"ctxt_id_valid\": true, \"context_id\": 101}}

{\"trace_id\": 1, \"element\": {\"type\": \"timestamp\", \"timestamp\": 5}}
{\"trace_id\": 2, \"element\": {\"type\": \"instr_range\", \"st_addr\": 16, \"en_addr\": 24, \"last_instr_sz\": 4, \"last_instr_exec\": true, \"last_i_subtype\": \"return_v8\"}}
{\"trace_id\": 2, \"element\": {\"type\": \"no_sync\"}}
";
        let elements: Vec<_> = ElementReader::new(input.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(elements.len(), 4);

        let context = PeContext {
            ctxt_id_valid: true,
            context_id: 101,
            ..PeContext::default()
        };
        assert_eq!(
            elements[0],
            (TraceId(1), TraceElement::ContextChange(context))
        );
        assert_eq!(
            elements[1],
            (TraceId(1), TraceElement::Timestamp { timestamp: 5 })
        );
        match elements[2] {
            (TraceId(2), TraceElement::InstrRange(range)) => {
                assert_eq!(range.last_instr_addr(), 20);
                assert_eq!(range.last_i_subtype, InstrSubtype::ReturnV8);
            }
            ref other => panic!("unexpected element {other:?}"),
        }
        assert_eq!(elements[3], (TraceId(2), TraceElement::NoSync));
    }

    #[test]
    fn test_parse_error_reports_line() {
        let input = "{\"trace_id\": 1, \"element\": {\"type\": \"trace_on\"}}\nnot json\n";
        let mut reader = ElementReader::new(input.as_bytes());
        assert!(reader.next().unwrap().is_ok());
        match reader.next().unwrap() {
            Err(ElementError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected a parse error, got {other:?}"),
        }
        assert!(reader.next().is_none());
    }
}
