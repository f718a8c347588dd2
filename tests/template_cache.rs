//! Template Cache Invariant
//!
//! Kept in its own test binary: the parse counter is process-wide.

#![cfg(feature = "test-hooks")]

use std::fs;
use std::sync::Arc;

use scriptflow_core::templates::{get_template_parse_count, reset_template_parse_count};
use scriptflow_core::{SpreadAssembler, TemplateRegistry};

const LAYOUT: &str = r#"<svg xmlns="http://www.w3.org/2000/svg"
    xmlns:inkscape="http://www.inkscape.org/namespaces/inkscape"
    width="300pt" height="400pt" id="exam-layout">
  <g inkscape:label="anchors">
    <circle cx="5" cy="5" r="1"><title>mark-sidebar</title><desc>sidebar</desc></circle>
  </g>
  <g inkscape:label="pages">
    <rect width="300" height="400"><title>mark</title></rect>
  </g>
</svg>"#;

const SIDEBAR: &str = r#"<svg xmlns="http://www.w3.org/2000/svg"
    xmlns:inkscape="http://www.inkscape.org/namespaces/inkscape"
    width="50pt" height="400pt" id="sidebar">
  <g inkscape:label="textfields">
    <rect x="10" y="10" width="20" height="20"><title>page-ok</title></rect>
  </g>
</svg>"#;

#[test]
fn invariant_templates_parse_once_per_file() {
    let dir = tempfile::tempdir().unwrap();
    let layout_path = dir.path().join("layout.svg");
    fs::write(&layout_path, LAYOUT).unwrap();
    fs::write(dir.path().join("sidebar.svg"), SIDEBAR).unwrap();

    let registry = Arc::new(TemplateRegistry::default());
    let assembler = SpreadAssembler::new(Arc::clone(&registry));
    reset_template_parse_count();

    for _ in 0..2 {
        let layout = registry.load_layout(&layout_path).unwrap();
        let spread = assembler.assemble(&layout, dir.path(), "mark", None).unwrap();
        assert_eq!(spread.ladders, vec!["mark-sidebar"]);
    }

    // one layout and one ladder, each read once
    assert_eq!(get_template_parse_count(), 2);
}
