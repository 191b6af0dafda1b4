use crate::e2e::*;
use kiln::{Context, Graph, Options, Status};
use std::rc::Rc;

#[test]
fn children_overlap_and_finish_before_parent() -> anyhow::Result<()> {
    let space = Rc::new(TestSpace::new()?);
    let recorder = Rc::new(Recorder::default());
    let mut graph = Graph::new();
    graph.set_progress(recorder.clone());

    let c = {
        let space = space.clone();
        graph.add_node(&[], &[&space.path("c")], move |ctx: Context| {
            let space = space.clone();
            async move {
                for name in ["a", "b"] {
                    let space2 = space.clone();
                    ctx.add_node(&[], &[&space.path(name)], move |ctx: Context| {
                        let cmd = sh(&space2, &format!("sleep 0.1; touch {}", name));
                        async move { ctx.run(cmd).await }
                    })?;
                }
                ctx.run(sh(&space, "test -f a && test -f b && touch c")).await
            }
        })?
    };

    let summary = graph.update(&[c], &Options::default().with_parallelism(2))?;
    assert_eq!((summary.visited, summary.ran, summary.failed), (3, 3, 0));
    assert_eq!(graph.status(c), Status::Clean);
    assert!(space.exists("c"));

    let first_finish = recorder
        .position("finish sleep 0.1; touch a")
        .min(recorder.position("finish sleep 0.1; touch b"));
    assert!(recorder.position("start sleep 0.1; touch a") < first_finish);
    assert!(recorder.position("start sleep 0.1; touch b") < first_finish);

    let parent = recorder.position("start test -f a && test -f b && touch c");
    assert!(parent > recorder.position("finish sleep 0.1; touch a"));
    assert!(parent > recorder.position("finish sleep 0.1; touch b"));
    assert_eq!(*recorder.peak.borrow(), 2);
    Ok(())
}

#[test]
fn parallelism_bounds_running_commands() -> anyhow::Result<()> {
    let space = Rc::new(TestSpace::new()?);
    let recorder = Rc::new(Recorder::default());
    let mut graph = Graph::new();
    graph.set_progress(recorder.clone());

    let mut roots = Vec::new();
    for i in 0..6 {
        let name = format!("out{}", i);
        let cmd = sh(&space, &format!("sleep 0.05; touch {}", name));
        roots.push(graph.add_node(&[], &[&space.path(&name)], move |ctx: Context| {
            let cmd = cmd.clone();
            async move { ctx.run(cmd).await }
        })?);
    }

    let summary = graph.update(&roots, &Options::default().with_parallelism(3))?;
    assert_eq!(summary.ran, 6);
    assert_eq!(*recorder.peak.borrow(), 3);
    for i in 0..6 {
        assert!(space.exists(&format!("out{}", i)));
    }
    Ok(())
}

#[test]
fn discovery_then_update_runs_declared_children() -> anyhow::Result<()> {
    let space = Rc::new(TestSpace::new()?);
    let mut graph = Graph::new();
    let out = space.path("gen");
    let top = {
        let space = space.clone();
        graph.add_node(&[], &[], move |ctx: Context| {
            let space = space.clone();
            async move {
                let cmd = sh(&space, "touch gen");
                ctx.add_node(&[], &[&space.path("gen")], move |ctx: Context| {
                    let cmd = cmd.clone();
                    async move { ctx.run(cmd).await }
                })?;
                Ok::<(), anyhow::Error>(())
            }
        })?
    };

    graph.discover(&[top], &Options::default())?;
    assert_eq!(graph.len(), 2);
    let gen = graph.producer(&out).unwrap();
    assert_eq!(graph.status(gen), Status::Dirty);
    assert!(!space.exists("gen"));

    let summary = graph.update(&[top], &Options::default())?;
    assert_eq!(summary.ran, 1);
    assert_eq!(graph.status(gen), Status::Clean);
    assert!(space.exists("gen"));
    Ok(())
}

#[test]
fn parent_waits_for_slower_child() -> anyhow::Result<()> {
    // The first child declared is the last to finish.
    let space = Rc::new(TestSpace::new()?);
    let recorder = Rc::new(Recorder::default());
    let mut graph = Graph::new();
    graph.set_progress(recorder.clone());

    let c = {
        let space = space.clone();
        graph.add_node(&[], &[&space.path("c")], move |ctx: Context| {
            let space = space.clone();
            async move {
                for (name, secs) in [("a", "0.3"), ("b", "0.05")] {
                    let cmd = sh(&space, &format!("sleep {}; touch {}", secs, name));
                    ctx.add_node(&[], &[&space.path(name)], move |ctx: Context| {
                        let cmd = cmd.clone();
                        async move { ctx.run(cmd).await }
                    })?;
                }
                ctx.run(sh(&space, "test -f a && test -f b && touch c")).await
            }
        })?
    };

    graph.update(&[c], &Options::default().with_parallelism(2))?;
    assert_eq!(graph.status(c), Status::Clean);

    let finish_a = recorder.position("finish sleep 0.3; touch a");
    let finish_b = recorder.position("finish sleep 0.05; touch b");
    assert!(finish_b < finish_a);
    assert!(recorder.position("start test -f a && test -f b && touch c") > finish_a);
    Ok(())
}

#[test]
fn queued_commands_are_not_reported_started() -> anyhow::Result<()> {
    let space = Rc::new(TestSpace::new()?);
    let recorder = Rc::new(Recorder::default());
    let mut graph = Graph::new();
    graph.set_progress(recorder.clone());

    let mut roots = Vec::new();
    for i in 0..4 {
        let cmd = sh(&space, &format!("sleep 0.05; touch o{}", i));
        roots.push(graph.add_node(&[], &[&space.path(&format!("o{}", i))], move |ctx: Context| {
            let cmd = cmd.clone();
            async move { ctx.run(cmd).await }
        })?);
    }

    graph.update(&roots, &Options::default().with_parallelism(1))?;
    let kinds: Vec<String> = recorder
        .events()
        .iter()
        .map(|e| e.split(' ').next().unwrap_or("").to_string())
        .collect();
    assert_eq!(kinds, ["start", "finish"].repeat(4));
    assert_eq!(*recorder.peak.borrow(), 1);
    Ok(())
}
