#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! AST-level check that every channel in the crate is bounded.
//!
//! MQTT bursts (retained replays on reconnect, a statestream flood from the
//! hub) must push back on the producer instead of growing a queue without
//! limit. The transport uses `try_send` into a bounded inbound queue and the
//! bridge command channel is bounded too.
//!
//! ```ignore
//! // BAD
//! let (tx, rx) = mpsc::unbounded_channel();
//! // GOOD
//! let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
//! ```

use std::fs;
use std::path::Path;
use syn::visit::Visit;
use syn::{Expr, ExprCall, File};
use walkdir::WalkDir;

struct UnboundedVisitor {
    file: String,
    violations: Vec<String>,
}

impl<'ast> Visit<'ast> for UnboundedVisitor {
    fn visit_expr_call(&mut self, call: &'ast ExprCall) {
        if let Expr::Path(path) = &*call.func {
            if path
                .path
                .segments
                .last()
                .is_some_and(|s| s.ident == "unbounded_channel")
            {
                self.violations.push(self.file.clone());
            }
        }
        syn::visit::visit_expr_call(self, call);
    }
}

fn violations_in(source: &str, file: &str) -> Vec<String> {
    let syntax: File = match syn::parse_file(source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Warning: Failed to parse {}: {}", file, e);
            return vec![];
        }
    };
    let mut visitor = UnboundedVisitor {
        file: file.to_string(),
        violations: Vec::new(),
    };
    visitor.visit_file(&syntax);
    visitor.violations
}

#[test]
fn detects_unbounded_channel() {
    let code = r#"
        fn start() {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<String>();
            let (a, b) = unbounded_channel();
        }
    "#;
    assert_eq!(violations_in(code, "t.rs").len(), 2);
}

#[test]
fn allows_bounded_channels() {
    let code = r#"
        fn start() {
            let (tx, rx) = mpsc::channel(64);
            let (btx, _) = broadcast::channel(256);
            let (reply, wait) = oneshot::channel();
        }
    "#;
    assert!(violations_in(code, "t.rs").is_empty());
}

#[test]
fn no_unbounded_channels_in_src() {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut all = Vec::new();

    for entry in WalkDir::new(&src_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
    {
        let Ok(source) = fs::read_to_string(entry.path()) else {
            continue;
        };
        all.extend(violations_in(&source, &entry.path().display().to_string()));
    }

    if !all.is_empty() {
        panic!(
            "\n\nUnbounded channels found (use a bounded mpsc::channel):\n  - {}\n",
            all.join("\n  - ")
        );
    }
}
