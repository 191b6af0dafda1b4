use crate::e2e::*;
use kiln::{is_recoverable, CommandFailed, Context, Graph, NodeId, Options, Status};
use std::cell::RefCell;
use std::rc::Rc;

/// Register a node whose body runs `script` in the space.
fn run_node(
    graph: &mut Graph,
    space: &TestSpace,
    ins: &[&str],
    out: &str,
    script: &str,
) -> anyhow::Result<NodeId> {
    let cmd = sh(space, script);
    let ins: Vec<String> = ins.iter().map(|p| space.path(p)).collect();
    let ins: Vec<&str> = ins.iter().map(|p| p.as_str()).collect();
    graph.add_node(&ins, &[&space.path(out)], move |ctx: Context| {
        let cmd = cmd.clone();
        async move { ctx.run(cmd).await }
    })
}

#[test]
fn failed_command_fails_dependents_only() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut graph = Graph::new();
    let producer = run_node(&mut graph, &space, &[], "x", "exit 1")?;
    let dependent = run_node(&mut graph, &space, &["x"], "y", "touch y")?;
    let unrelated = run_node(&mut graph, &space, &[], "z", "touch z")?;

    let summary = graph.update(&[dependent, unrelated], &Options::default())?;
    assert_eq!(summary.failed, 2);
    // The failing command and the unrelated one; the dependent never ran.
    assert_eq!(summary.ran, 2);
    assert_eq!(graph.status(producer), Status::Failed);
    assert_eq!(graph.status(dependent), Status::Failed);
    assert_eq!(graph.status(unrelated), Status::Clean);
    assert!(!space.exists("y"));
    assert!(space.exists("z"));
    assert!(graph.any_failed());

    // The next pass retries the failures.
    let summary = graph.update(&[dependent], &Options::default())?;
    assert_eq!((summary.ran, summary.failed), (1, 2));
    Ok(())
}

#[test]
fn failed_child_stops_parent_command() -> anyhow::Result<()> {
    let space = Rc::new(TestSpace::new()?);
    let mut graph = Graph::new();
    let errors = Rc::new(RefCell::new(Vec::new()));
    let parent = {
        let (space, errors) = (space.clone(), errors.clone());
        graph.add_node(&[], &[&space.path("parent")], move |ctx: Context| {
            let (space, errors) = (space.clone(), errors.clone());
            async move {
                let cmd = sh(&space, "exit 2");
                ctx.add_node(&[], &[&space.path("child")], move |ctx: Context| {
                    let cmd = cmd.clone();
                    let errors = errors.clone();
                    async move {
                        let result = ctx.run(cmd).await;
                        if let Err(err) = &result {
                            let code = err
                                .downcast_ref::<CommandFailed>()
                                .and_then(|f| f.status.code());
                            errors.borrow_mut().push((is_recoverable(err), code));
                        }
                        result
                    }
                })?;
                ctx.run(sh(&space, "touch parent")).await
            }
        })?
    };

    let summary = graph.update(&[parent], &Options::default())?;
    assert_eq!((summary.ran, summary.failed), (1, 2));
    assert_eq!(*errors.borrow(), vec![(true, Some(2))]);
    assert_eq!(graph.status(parent), Status::Failed);
    assert!(!space.exists("parent"));
    Ok(())
}

#[test]
fn spawn_failure_is_recoverable() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut graph = Graph::new();
    let node = graph.add_node(&[], &[&space.path("never")], |ctx: Context| async move {
        ctx.run(Command::new(["/nonexistent/kiln-tool"])).await
    })?;
    let summary = graph.update(&[node], &Options::default())?;
    assert_eq!((summary.ran, summary.failed), (0, 1));
    assert_eq!(graph.status(node), Status::Failed);
    Ok(())
}
