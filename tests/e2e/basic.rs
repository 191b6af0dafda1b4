use crate::e2e::*;
use kiln::{Context, Graph, Options, Status, Summary};
use std::rc::Rc;

async fn touch_outputs(ctx: Context) -> anyhow::Result<()> {
    let mut argv = vec!["touch".to_string()];
    argv.extend(ctx.outputs().iter().cloned());
    ctx.run(Command::new(argv)).await
}

#[test]
fn missing_output_builds_once() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in1", "")?;
    space.set_mtime("in1", 1_000_000)?;
    let (in1, out1) = (space.path("in1"), space.path("out1"));

    let mut graph = Graph::new();
    let node = graph.add_node(&[&in1], &[&out1], touch_outputs)?;

    let summary = graph.discover(&[node], &Options::default())?;
    assert_eq!(summary.ran, 0);
    assert_eq!(graph.status(node), Status::Dirty);
    assert!(!space.exists("out1"));

    let summary = graph.update(&[node], &Options::default())?;
    assert_eq!(
        summary,
        Summary {
            visited: 1,
            ran: 1,
            failed: 0,
            left_dirty: 0,
        }
    );
    assert!(space.exists("out1"));
    assert_eq!(graph.status(node), Status::Clean);

    // A fresh look at the disk agrees.
    let mut graph = Graph::new();
    let node = graph.add_node(&[&in1], &[&out1], touch_outputs)?;
    graph.discover(&[node], &Options::default())?;
    assert_eq!(graph.status(node), Status::Clean);
    let summary = graph.update(&[node], &Options::default())?;
    assert_eq!(summary.ran, 0);
    Ok(())
}

#[test]
fn clean_nodes_are_skipped() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    for name in ["old.in", "old.out", "new.in"] {
        space.write(name, "")?;
    }
    space.set_mtime("old.in", 1_000_000)?;
    space.set_mtime("old.out", 2_000_000)?;

    let mut graph = Graph::new();
    let (old_in, old_out) = (space.path("old.in"), space.path("old.out"));
    let (new_in, new_out) = (space.path("new.in"), space.path("new.out"));
    let fresh = graph.add_node(&[&old_in], &[&old_out], touch_outputs)?;
    let stale = graph.add_node(&[&new_in], &[&new_out], touch_outputs)?;
    graph.discover(&[fresh, stale], &Options::default())?;
    assert_eq!(graph.status(fresh), Status::Clean);
    assert_eq!(graph.status(stale), Status::Dirty);

    let summary = graph.update(&[fresh, stale], &Options::default())?;
    assert_eq!((summary.visited, summary.ran), (1, 1));

    let summary = graph.update(&[fresh, stale], &Options::default())?;
    assert_eq!((summary.visited, summary.ran), (0, 0));
    Ok(())
}

#[test]
fn touched_input_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "")?;
    space.set_mtime("in", 1_000_000)?;
    let (input, output) = (space.path("in"), space.path("out"));

    let mut graph = Graph::new();
    let node = graph.add_node(&[&input], &[&output], touch_outputs)?;
    graph.update(&[node], &Options::default())?;
    assert_eq!(graph.status(node), Status::Clean);

    // Move the input past the output, as an editor save would.
    space.set_mtime("in", 4_000_000_000)?;
    assert_eq!(graph.mark_changed(&[&input])?, vec![node]);
    let summary = graph.update(&[node], &Options::default())?;
    assert_eq!(summary.ran, 1);
    assert_eq!(graph.status(node), Status::Clean);
    Ok(())
}

#[test]
fn explain_reports_reason() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "")?;
    let recorder = Rc::new(Recorder::default());

    let mut graph = Graph::new();
    graph.set_progress(recorder.clone());
    let out = space.path("out");
    let node = graph.add_node(&[&space.path("in")], &[&out], touch_outputs)?;
    graph.discover(&[node], &Options::default().with_explain(true))?;

    assert_eq!(
        recorder.events(),
        vec![format!("dirty {}: output {} is missing", out, out)]
    );
    Ok(())
}
