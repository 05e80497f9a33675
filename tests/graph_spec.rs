use serde_json::json;
use specgraph::graph::{self, DependencyGraph};
use specgraph::models::Task;
use speculate2::speculate;

fn build(edges: &[(&str, &[&str])]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for (id, deps) in edges {
        graph.add_node(*id, deps.iter().map(|d| d.to_string()).collect());
    }
    graph
}

fn task(id: &str, depends_on: &[&str]) -> Task {
    serde_json::from_value(json!({
        "id": id,
        "description": format!("work for {id}"),
        "depends_on": depends_on,
    }))
    .expect("valid task")
}

speculate! {
    describe "detect_cycles" {
        it "finds nothing in an acyclic graph" {
            let g = build(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
            assert!(g.detect_cycles().is_empty());
            assert!(!g.has_cycles());
        }

        it "reports a cycle as a closed path" {
            let g = build(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
            assert_eq!(g.detect_cycles(), vec![vec!["a", "b", "c", "a"]]);
        }

        it "reports a self dependency" {
            let g = build(&[("a", &["a"])]);
            assert_eq!(g.detect_cycles(), vec![vec!["a", "a"]]);
        }

        it "reports independent cycles separately" {
            let g = build(&[("a", &["b"]), ("b", &["a"]), ("c", &["d"]), ("d", &["c"])]);
            assert_eq!(g.detect_cycles(), vec![vec!["a", "b", "a"], vec!["c", "d", "c"]]);
        }

        it "treats unknown dependencies as leaves" {
            let g = build(&[("a", &["missing"])]);
            assert!(g.detect_cycles().is_empty());
        }

        it "gives the same answer on every run" {
            let g = build(&[("x", &["y", "z"]), ("y", &["x"]), ("z", &["x"])]);
            let first = g.detect_cycles();
            assert_eq!(first, vec![vec!["x", "y", "x"], vec!["x", "z", "x"]]);
            assert_eq!(g.detect_cycles(), first);
        }

        it "works over sub-items" {
            let tasks = vec![
                task("task-001", &["task-002"]),
                task("task-002", &["task-001"]),
                task("task-003", &[]),
            ];
            let cycles = graph::detect_cycles(&tasks);
            assert_eq!(cycles, vec![vec!["task-001", "task-002", "task-001"]]);
            assert_eq!(graph::format_cycle(&cycles[0]), "task-001 -> task-002 -> task-001");
        }
    }

    describe "topological_order" {
        it "puts dependencies first" {
            let g = build(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
            assert_eq!(g.topological_order().unwrap(), vec!["c", "b", "a"]);
        }

        it "leaves out unknown dependencies" {
            let g = build(&[("a", &["ghost"]), ("b", &[])]);
            assert_eq!(g.topological_order().unwrap(), vec!["a", "b"]);
        }

        it "returns the cycles when there is no order" {
            let g = build(&[("a", &["b"]), ("b", &["a"])]);
            assert_eq!(g.topological_order().unwrap_err(), vec![vec!["a", "b", "a"]]);
        }
    }

    describe "queries" {
        it "lists dependencies and dependents" {
            let g = build(&[("a", &["c"]), ("b", &["c"]), ("c", &[])]);
            assert_eq!(g.len(), 3);
            assert!(g.contains("c"));
            assert_eq!(g.dependencies_of("a"), ["c".to_string()]);
            assert!(g.dependencies_of("nope").is_empty());
            assert_eq!(g.dependents_of("c"), vec!["a", "b"]);
        }
    }
}
