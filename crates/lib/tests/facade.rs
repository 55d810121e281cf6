//! Facade semantics that don't need a live watcher: enumeration, reads,
//! writes, lifecycle basics. Engines here run with watching disabled unless
//! stated otherwise.

mod helpers;

use std::{path::PathBuf, sync::Arc, time::Duration};

use helpers::Scratch;
use regen::{
	compose,
	error::CriticalError,
	events::{Event, RunStatus},
	fs::{FindUpOptions, ListOptions, ReadOptions, ScanOptions, StopAt},
	Config, GeneratorSpec, Regen,
};

#[tokio::test]
async fn scan_enumerates_and_relativises() {
	let scratch = Scratch::new();
	scratch.file("a.txt", "a");
	scratch.file("b.md", "b");
	scratch.file("sub/c.txt", "c");

	let engine = Regen::new(Config::new(scratch.root()), |ctx| async move {
		ctx.fs.scan(["**/*.txt"], &ScanOptions::default())
	})
	.expect("engine");

	let files = engine.wait().await.expect("scan");
	assert_eq!(files, vec![PathBuf::from("a.txt"), PathBuf::from("sub/c.txt")]);
}

#[tokio::test]
async fn scan_honours_cwd_and_absolute() {
	let scratch = Scratch::new();
	scratch.file("sub/inner/x.gen", "x");
	let sub = scratch.path("sub");

	let engine = Regen::new(Config::new(scratch.root()), move |ctx| {
		let cwd = PathBuf::from("sub");
		async move {
			ctx.fs.scan(
				["**/*.gen"],
				&ScanOptions {
					cwd: Some(cwd),
					absolute: true,
					..Default::default()
				},
			)
		}
	})
	.expect("engine");

	let files = engine.wait().await.expect("scan");
	assert_eq!(files, vec![sub.join("inner/x.gen")]);
}

#[tokio::test]
async fn scan_negatives_and_dotfiles() {
	let scratch = Scratch::new();
	scratch.file("keep.txt", "k");
	scratch.file("skip/no.txt", "n");
	scratch.file(".hidden/h.txt", "h");

	let engine = Regen::new(Config::new(scratch.root()), |ctx| async move {
		let plain = ctx
			.fs
			.scan(["**/*.txt", "!skip/**"], &ScanOptions::default())?;
		let dotted = ctx.fs.scan(
			["**/*.txt", "!skip/**"],
			&ScanOptions {
				dot: true,
				..Default::default()
			},
		)?;
		Ok((plain, dotted))
	})
	.expect("engine");

	let (plain, dotted) = engine.wait().await.expect("scan");
	assert_eq!(plain, vec![PathBuf::from("keep.txt")]);
	assert_eq!(
		dotted,
		vec![PathBuf::from(".hidden/h.txt"), PathBuf::from("keep.txt")]
	);
}

#[tokio::test]
async fn list_filters_by_name_glob() {
	let scratch = Scratch::new();
	scratch.file("conf/a.json", "{}");
	scratch.file("conf/b.json", "{}");
	scratch.file("conf/ignore.txt", "");
	scratch.dir("conf/subdir");

	let engine = Regen::new(Config::new(scratch.root()), |ctx| async move {
		let all = ctx.fs.list("conf", &ListOptions::default())?;
		let json = ctx.fs.list(
			"conf",
			&ListOptions {
				glob: Some("*.json".into()),
				..Default::default()
			},
		)?;
		Ok((all, json))
	})
	.expect("engine");

	let (all, json) = engine.wait().await.expect("list");
	assert_eq!(
		all,
		["a.json", "b.json", "ignore.txt", "subdir"]
			.map(PathBuf::from)
			.to_vec()
	);
	assert_eq!(json, ["a.json", "b.json"].map(PathBuf::from).to_vec());
}

#[tokio::test]
async fn find_up_takes_first_match_in_listing_order() {
	let scratch = Scratch::new();
	scratch.file("a/b/c/foo.txt", "deep");
	scratch.file("a/foo.txt", "shallow");

	let engine = Regen::new(Config::new(scratch.root()), |ctx| async move {
		let from_c = ctx.fs.find_up(
			["foo.txt"],
			&FindUpOptions {
				cwd: Some(PathBuf::from("a/b/c")),
				..Default::default()
			},
		)?;
		let from_b = ctx.fs.find_up(
			["foo.txt"],
			&FindUpOptions {
				cwd: Some(PathBuf::from("a/b")),
				..Default::default()
			},
		)?;
		Ok((from_c, from_b))
	})
	.expect("engine");

	let (from_c, from_b) = engine.wait().await.expect("find_up");
	assert_eq!(from_c, Some(PathBuf::from("a/b/c/foo.txt")));
	assert_eq!(from_b, Some(PathBuf::from("a/foo.txt")));
}

#[tokio::test]
async fn find_up_stops_at_path_and_glob() {
	let scratch = Scratch::new();
	scratch.file("target.txt", "top");
	scratch.dir("a/.git");
	scratch.dir("a/b");
	let stop_dir = scratch.path("a");

	let engine = Regen::new(Config::new(scratch.root()), move |ctx| {
		let stop_dir = stop_dir.clone();
		async move {
			// the stop dir is visited, but ascent ends there: the match at
			// the root is never reached
			let by_path = ctx.fs.find_up(
				["target.txt"],
				&FindUpOptions {
					cwd: Some(PathBuf::from("a/b")),
					stop: Some(StopAt::Path(stop_dir)),
					..Default::default()
				},
			)?;
			let by_glob = ctx.fs.find_up(
				["target.txt"],
				&FindUpOptions {
					cwd: Some(PathBuf::from("a/b")),
					stop: Some(StopAt::Globs(vec![".git".into()])),
					..Default::default()
				},
			)?;
			let unstopped = ctx.fs.find_up(
				["target.txt"],
				&FindUpOptions {
					cwd: Some(PathBuf::from("a/b")),
					..Default::default()
				},
			)?;
			Ok((by_path, by_glob, unstopped))
		}
	})
	.expect("engine");

	let (by_path, by_glob, unstopped) = engine.wait().await.expect("find_up");
	assert_eq!(by_path, None);
	assert_eq!(by_glob, None);
	assert_eq!(unstopped, Some(PathBuf::from("target.txt")));
}

#[tokio::test]
async fn read_variants() {
	let scratch = Scratch::new();
	scratch.file("a.txt", "A");

	let engine = Regen::new(Config::new(scratch.root()), |ctx| async move {
		let bytes = ctx.fs.read("a.txt", ReadOptions::default())?;
		let text = ctx.fs.read_to_string("a.txt", ReadOptions::default())?;
		let missing = ctx.fs.try_read("nope.txt", ReadOptions::default());
		let missing_text = ctx.fs.try_read_to_string("nope.txt", ReadOptions::default());
		Ok((bytes, text, missing, missing_text))
	})
	.expect("engine");

	let (bytes, text, missing, missing_text) = engine.wait().await.expect("reads");
	assert_eq!(bytes, b"A".to_vec());
	assert_eq!(text, "A");
	assert_eq!(missing, None);
	assert_eq!(missing_text, None);
}

#[tokio::test]
async fn stat_and_existence_probes() {
	let scratch = Scratch::new();
	scratch.file("file.txt", "f");
	scratch.dir("dir");

	let engine = Regen::new(Config::new(scratch.root()), |ctx| async move {
		assert!(ctx.fs.stat("file.txt").is_some_and(|m| m.is_file()));
		assert!(ctx.fs.stat("missing.txt").is_none());
		assert!(ctx.fs.lstat("dir").is_some_and(|m| m.is_dir()));

		assert!(ctx.fs.exists("file.txt"));
		assert!(ctx.fs.exists("dir"));
		assert!(!ctx.fs.exists("missing.txt"));

		assert!(ctx.fs.file_exists("file.txt"));
		assert!(!ctx.fs.file_exists("dir"));

		assert!(ctx.fs.directory_exists("dir"));
		assert!(!ctx.fs.directory_exists("file.txt"));

		assert!(!ctx.fs.symlink_exists("file.txt"));
		Ok(())
	})
	.expect("engine");

	engine.wait().await.expect("probes");
}

#[tokio::test]
async fn write_creates_parents_and_skips_identical_content() {
	let scratch = Scratch::new();
	let out = scratch.path("deep/nested/out.txt");

	let engine = Regen::new(Config::new(scratch.root()), |ctx| async move {
		let first = ctx.fs.write("deep/nested/out.txt", "payload")?;
		let second = ctx.fs.write("deep/nested/out.txt", "payload")?;
		let third = ctx.fs.write("deep/nested/out.txt", "changed")?;
		Ok((first, second, third))
	})
	.expect("engine");
	let mut events = engine.subscribe();

	let (first, second, third) = engine.wait().await.expect("writes");
	assert!(first, "first write hits the disk");
	assert!(!second, "identical content is skipped");
	assert!(third, "changed content hits the disk");
	assert_eq!(std::fs::read_to_string(&out).expect("read back"), "changed");

	let mut writes = 0;
	while let Ok(ev) = events.try_recv() {
		if matches!(ev, Event::Write { .. }) {
			writes += 1;
		}
	}
	assert_eq!(writes, 2, "one write event per mutating write");
}

#[tokio::test]
async fn body_errors_reject_wait_and_emit_error_events() {
	let scratch = Scratch::new();

	let engine: Arc<Regen<()>> = Regen::new(Config::new(scratch.root()), |ctx| async move {
		ctx.fs.read("does-not-exist.txt", ReadOptions::default())?;
		Ok(())
	})
	.expect("engine");
	let mut events = engine.subscribe();

	let err = engine.wait().await.expect_err("read must fail");
	assert!(err.to_string().contains("reading file"));

	let mut saw_error = false;
	while let Ok(ev) = events.try_recv() {
		saw_error |= matches!(ev, Event::Error { .. });
	}
	assert!(saw_error);
}

#[tokio::test]
async fn custom_events_carry_engine_name() {
	let scratch = Scratch::new();

	let engine: Arc<Regen<()>> = Regen::new(
		Config::new(scratch.root()).name("emitter"),
		|ctx| async move {
			ctx.emit("halfway");
			Ok(())
		},
	)
	.expect("engine");
	let mut events = engine.subscribe();

	engine.wait().await.expect("run");

	let mut custom = None;
	while let Ok(ev) = events.try_recv() {
		if let Event::Custom { event, name } = ev {
			custom = Some((event, name));
		}
	}
	assert_eq!(custom, Some(("halfway".into(), "emitter".into())));
}

#[tokio::test]
async fn rerun_preserves_store() {
	let scratch = Scratch::new();

	let engine = Regen::new(Config::new(scratch.root()), |ctx| async move {
		let previous: u32 = ctx.store.get("count").unwrap_or(0);
		ctx.store.insert("count", previous + 1);
		Ok(previous + 1)
	})
	.expect("engine");

	assert_eq!(engine.wait().await.expect("first run"), 1);
	engine.rerun().await.expect("rerun");

	assert!(
		helpers::eventually(Duration::from_secs(5), || {
			engine.status() == RunStatus::Finished
		})
		.await
	);
	assert_eq!(engine.wait().await.expect("second run"), 2);
}

#[tokio::test]
async fn destroy_is_terminal() {
	let scratch = Scratch::new();

	let engine: Arc<Regen<()>> =
		Regen::new(Config::new(scratch.root()), |_ctx| async move { Ok(()) }).expect("engine");

	engine.wait().await.expect("first run");
	engine.destroy().await.expect("destroy");
	engine.destroy().await.expect("destroy is idempotent");

	let err = engine.rerun().await.expect_err("rerun after destroy");
	assert!(matches!(err, CriticalError::Destroyed));
}

#[tokio::test]
async fn wait_for_start_times_out_when_nothing_triggers() {
	let scratch = Scratch::new();

	let engine: Arc<Regen<()>> =
		Regen::new(Config::new(scratch.root()), |_ctx| async move { Ok(()) }).expect("engine");

	engine.wait().await.expect("first run");
	let err = engine
		.wait_for_start(Some(Duration::from_millis(100)))
		.await
		.expect_err("no second run is coming");
	assert!(err.to_string().contains("no run started"));
	assert_eq!(engine.status(), RunStatus::Finished);
}

#[tokio::test]
async fn compose_resolves_children_in_order() {
	let scratch = Scratch::new();
	scratch.file("one.txt", "one");
	scratch.file("two.txt", "two");

	let composition = compose([
		GeneratorSpec::new(
			Config::new(scratch.root()).name("first"),
			|ctx| async move { ctx.fs.read_to_string("one.txt", ReadOptions::default()) },
		),
		GeneratorSpec::new(
			Config::new(scratch.root()).name("second"),
			|ctx| async move { ctx.fs.read_to_string("two.txt", ReadOptions::default()) },
		),
	])
	.expect("compose");

	let results = composition.wait().await.expect("children");
	assert_eq!(results, vec!["one".to_string(), "two".to_string()]);

	assert!(
		helpers::eventually(Duration::from_secs(5), || {
			composition.status() == RunStatus::Finished
		})
		.await
	);

	composition.destroy().await.expect("destroy");
	let err = composition.rerun().await.expect_err("children are gone");
	assert!(matches!(err, CriticalError::Destroyed));
}

#[tokio::test]
async fn composed_children_share_one_bus() {
	let scratch = Scratch::new();

	let composition = compose([
		GeneratorSpec::new(Config::new(scratch.root()).name("alpha"), |ctx| async move {
			ctx.emit("from alpha");
			Ok(())
		}),
		GeneratorSpec::new(Config::new(scratch.root()).name("beta"), |ctx| async move {
			ctx.emit("from beta");
			Ok(())
		}),
	])
	.expect("compose");
	let mut events = composition.events().subscribe();

	composition.wait().await.expect("children");

	let mut names = Vec::new();
	while let Ok(ev) = events.try_recv() {
		if let Event::Custom { name, .. } = ev {
			names.push(name);
		}
	}
	names.sort();
	assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
}
