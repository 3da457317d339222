// End-to-end resolution and flow-graph scenarios

use flowtrace::{
    resolve, CodeSet, EdgeKind, FileInput, FlowError, Language, NodeKind, Pipeline, ResolutionError, TraceStatus,
};
use proptest::prelude::*;

fn python(main: &str, aux: &[(&str, &str)]) -> CodeSet {
    CodeSet::new(
        Language::Python,
        FileInput::new("main.py", main),
        aux.iter().map(|(path, content)| FileInput::new(*path, *content)).collect(),
    )
}

#[test]
fn test_main_calls_helper_in_other_file() {
    let input = python(
        "from utils import helper\n\ndef main():\n    helper()\n",
        &[("utils.py", "def helper():\n    return 1\n")],
    );
    let analysis = Pipeline::default().analyze(&input).unwrap();
    let graph = &analysis.graph;

    assert_eq!(graph.nodes_of_kind(NodeKind::File).count(), 2);
    assert_eq!(graph.nodes_of_kind(NodeKind::Function).count(), 2);
    let calls: Vec<_> = graph.edges_of_kind(EdgeKind::Call).collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].source_node_id, "main.py#main");
    assert_eq!(calls[0].target_node_id, "utils.py#helper");
    assert!(graph.validate().is_ok());
}

#[test]
fn test_dependencies_come_first() {
    let input = python(
        "import b\n",
        &[("b.py", "import c\n"), ("c.py", "x = 1\n"), ("a.py", "y = 2\n")],
    );
    let unit = Pipeline::default().resolve(&input).unwrap();
    let order: Vec<&str> = unit.paths().collect();
    let pos = |p: &str| order.iter().position(|o| *o == p).unwrap();
    assert!(pos("c.py") < pos("b.py"));
    assert!(pos("b.py") < pos("main.py"));
    assert_eq!(unit.primary, "main.py");
}

#[test]
fn test_cycle_produces_no_unit() {
    let input = python("import a\n", &[("a.py", "import b\n"), ("b.py", "import a\n")]);
    let err = Pipeline::default().resolve(&input).unwrap_err();
    match err {
        FlowError::Resolution(ResolutionError::CyclicDependency { cycle }) => {
            assert!(cycle.contains(&"a.py".to_string()));
            assert!(cycle.contains(&"b.py".to_string()));
            assert_eq!(cycle.first(), cycle.last());
        }
        other => panic!("expected a cycle, got {:?}", other),
    }
}

#[test]
fn test_unresolved_externals_are_collected() {
    let input = python("import os\nimport numpy as np\nx = 1\n", &[]);
    let analysis = Pipeline::default().analyze(&input).unwrap();
    assert_eq!(analysis.unresolved.len(), 2);
    assert!(analysis.unresolved.iter().all(|r| r.referencing_file == "main.py"));
}

#[test]
fn test_no_functions_gives_file_nodes_only() {
    let input = python("x = 1\n", &[("other.py", "y = 2\n")]);
    let analysis = Pipeline::default().analyze(&input).unwrap();
    assert_eq!(analysis.graph.nodes.len(), 2);
    assert!(analysis.graph.edges.is_empty());
}

#[test]
fn test_c_include_graph() {
    let input = CodeSet::new(
        Language::C,
        FileInput::new("main.c", "#include <stdio.h>\n#include \"math_utils.h\"\nint main(void) { return square(3); }\n"),
        vec![
            FileInput::new("math_utils.h", "int square(int x);\n"),
            FileInput::new("math_utils.c", "#include \"math_utils.h\"\nint square(int x) { return x * x; }\n"),
        ],
    );
    let pipeline = Pipeline::default();
    let analysis = pipeline.analyze(&input).unwrap();
    assert!(analysis.unit.depends_on("main.c", "math_utils.h"));
    assert_eq!(analysis.unresolved.len(), 1);
    assert_eq!(analysis.graph.edges_of_kind(EdgeKind::Call).count(), 1);

    let trace = pipeline.trace_blocking(&input).unwrap();
    assert_eq!(trace.status, TraceStatus::Completed);
}

#[test]
fn test_input_errors_before_parsing() {
    let pipeline = Pipeline::default();

    let traversal = CodeSet::new(Language::Python, FileInput::new("../main.py", "x = 1\n"), vec![]);
    assert_eq!(pipeline.analyze(&traversal).unwrap_err().report().kind, "InvalidPath");

    let duplicate = python("x = 1\n", &[("./main.py", "y = 2\n")]);
    assert_eq!(pipeline.analyze(&duplicate).unwrap_err().report().kind, "DuplicatePath");

    let large = python(&"x = 1\n".repeat(5000), &[]);
    assert_eq!(pipeline.analyze(&large).unwrap_err().report().kind, "FileTooLarge");
}

#[test]
fn test_node_ids_are_stable() {
    let input = python(
        "class Greeter:\n    def greet(self):\n        return helper()\n\ndef helper():\n    return 'hi'\n",
        &[],
    );
    let first = Pipeline::default().analyze(&input).unwrap();
    let second = Pipeline::default().analyze(&input).unwrap();
    assert_eq!(first.graph, second.graph);
    assert!(first.graph.node("main.py#Greeter.greet").is_some());
    assert!(first.graph.node("main.py#helper").is_some());
}

proptest! {
    #[test]
    fn prop_resolution_order_ignores_input_order(seed in any::<u64>()) {
        let mut aux = vec![
            FileInput::new("b.py", "import c\n"),
            FileInput::new("c.py", "x = 1\n"),
            FileInput::new("d.py", "y = 2\n"),
            FileInput::new("e.py", "import d\nimport c\n"),
        ];
        // deterministic shuffle from the seed
        let mut state = seed;
        for i in (1..aux.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state >> 33) as usize % (i + 1);
            aux.swap(i, j);
        }

        let main = FileInput::new("main.py", "import b\nimport e\n");
        let first = resolve(main.clone(), aux.clone(), Language::Python).unwrap();
        let second = resolve(main, aux, Language::Python).unwrap();
        let order: Vec<&str> = first.paths().collect();
        prop_assert_eq!(&order, &second.paths().collect::<Vec<_>>());
        prop_assert_eq!(order, vec!["c.py", "b.py", "d.py", "e.py", "main.py"]);
        prop_assert_eq!(first.fingerprint, second.fingerprint);
    }
}
