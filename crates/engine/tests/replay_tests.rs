use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use pyreplay_common::types::{
    ExecutionTrace, ExecutionType, Scope, TraceStep, VarValue, Variables, MAIN_FILE,
};
use pyreplay_engine::{FileManager, MemoryFileManager, PythonAnalyzer, ReplayConfig, ReplayEngine};
use tracing::info;

const LOOP_SOURCE: &str = "for i in range(3):\n    s = i\nprint(s)\n";

fn vars(pairs: &[(&str, VarValue)]) -> Variables {
    pairs.iter().map(|(name, value)| (name.to_string(), value.clone())).collect()
}

fn step(line: usize, pairs: &[(&str, VarValue)]) -> TraceStep {
    TraceStep::new(line, vars(pairs))
}

fn int(i: i64) -> VarValue {
    VarValue::Int(i)
}

fn engine(files: Arc<MemoryFileManager>, replaying: Arc<AtomicBool>) -> ReplayEngine {
    ReplayEngine::new(ReplayConfig::default(), Arc::new(PythonAnalyzer::new()), files, replaying)
}

fn loop_trace() -> Arc<ExecutionTrace> {
    let steps = vec![
        step(1, &[]),
        step(2, &[("i", int(0))]),
        step(1, &[("i", int(0)), ("s", int(0))]),
        step(2, &[("i", int(1)), ("s", int(0))]),
        step(1, &[("i", int(1)), ("s", int(1))]),
        step(2, &[("i", int(2)), ("s", int(1))]),
        step(1, &[("i", int(2)), ("s", int(2))]),
        step(3, &[("i", int(2)), ("s", int(2))]),
        step(3, &[("i", int(2)), ("s", int(2))]).with_execution_type(ExecutionType::Return),
    ];
    Arc::new(ExecutionTrace::from_steps(LOOP_SOURCE, steps))
}

fn loop_engine() -> ReplayEngine {
    let files = Arc::new(MemoryFileManager::with_files([(MAIN_FILE, LOOP_SOURCE)]));
    engine(files, Arc::new(AtomicBool::new(false)))
}

#[test]
fn test_loop_body_shows_post_assignment_values() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let mut engine = loop_engine();
    assert!(engine.start_replay(loop_trace()));

    let mut shown = Vec::new();
    for index in [1, 3, 5, 7] {
        assert!(engine.jump_to_step(index));
        let view = engine.current_view().unwrap();
        shown.push((view.line_number, view.variables.get("s").cloned()));
    }
    assert_eq!(
        shown,
        vec![(2, Some(int(0))), (2, Some(int(1))), (2, Some(int(2))), (3, Some(int(2)))]
    );

    engine.jump_to_step(1);
    let view = engine.current_view().unwrap();
    assert_eq!(view.variables.get("i"), Some(&int(0)));
    assert!(view.decoration.rows.contains(&"s = 0".to_string()));
}

#[test]
fn test_return_events_are_not_navigable() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let trace = loop_trace();
    let mut engine = loop_engine();
    assert!(engine.start_replay(trace.clone()));

    assert_eq!(engine.step_count(), Some(trace.without_return_events().len()));
    assert_eq!(engine.step_count(), Some(8));
    assert!(engine.steps().unwrap().iter().all(|step| step.execution_type == ExecutionType::Line));
}

#[test]
fn test_jump_to_percentage_rounds_and_clamps() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let mut engine = loop_engine();
    assert!(engine.start_replay(loop_trace()));

    let cases = [(50.0, 4), (12.5, 1), (0.0, 0), (100.0, 7), (-10.0, 0), (400.0, 7)];
    for (percentage, expected) in cases {
        assert!(engine.jump_to_percentage(percentage));
        assert_eq!(engine.cursor(), Some(expected), "percentage {percentage}");
    }
}

#[test]
fn test_restarting_the_same_trace_rewinds() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let trace = loop_trace();
    let mut engine = loop_engine();
    assert!(engine.start_replay(trace.clone()));
    let first_view = engine.current_view().cloned();
    let maps = engine.maps().unwrap();

    assert!(engine.jump_to_step(5));
    assert!(engine.start_replay(trace.clone()));
    assert_eq!(engine.cursor(), Some(0));
    assert!(Arc::ptr_eq(&maps, &engine.maps().unwrap()));
    assert_eq!(engine.current_view().cloned(), first_view);

    // a different trace rebuilds the analysis
    assert!(engine.start_replay(loop_trace()));
    assert!(!Arc::ptr_eq(&maps, &engine.maps().unwrap()));
}

#[test]
fn test_store_subscript_shows_new_value() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let source = "beats = {1: 'a'}\nbeats[1] = 'b'\n";
    let steps = vec![
        step(1, &[]),
        step(2, &[("beats", VarValue::Repr("{1: 'a'}".into()))]),
        step(2, &[("beats", VarValue::Repr("{1: 'b'}".into()))])
            .with_execution_type(ExecutionType::Return),
    ];
    let files = Arc::new(MemoryFileManager::with_files([(MAIN_FILE, source)]));
    let mut engine = engine(files, Arc::new(AtomicBool::new(false)));
    assert!(engine.start_replay(Arc::new(ExecutionTrace::from_steps(source, steps))));

    assert!(engine.step_forward());
    let view = engine.current_view().unwrap();
    assert_eq!(view.variables.get("beats[1]"), Some(&VarValue::Str("b".into())));
    assert!(view.decoration.rows.contains(&"beats[1] = b".to_string()));
}

#[test]
fn test_builtins_and_functions_are_hidden() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let source = "def f():\n    return 1\nprint(f)\nlen = 3\n";
    let function = VarValue::Repr("<function f at 0x7f>".into());
    let steps = vec![
        step(1, &[]),
        step(3, &[("f", function.clone())]),
        step(4, &[("f", function.clone())]),
        step(4, &[("f", function.clone()), ("len", int(3))])
            .with_execution_type(ExecutionType::Return),
    ];
    let files = Arc::new(MemoryFileManager::with_files([(MAIN_FILE, source)]));
    let mut engine = engine(files, Arc::new(AtomicBool::new(false)));
    assert!(engine.start_replay(Arc::new(ExecutionTrace::from_steps(source, steps))));

    assert!(engine.jump_to_step(1));
    assert!(engine.current_view().unwrap().variables.is_empty());

    assert!(engine.jump_to_step(2));
    let view = engine.current_view().unwrap();
    assert_eq!(view.variables.get("len"), Some(&int(3)));
    assert!(view.variables.get("f").is_none());
}

#[test]
fn test_file_sync_saves_edits_and_sets_flag() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let main = "import helper\nhelper.run()\n";
    let helper = "def run():\n    y = 5\n    return y\n";
    let files =
        Arc::new(MemoryFileManager::with_files([(MAIN_FILE, main), ("/helper.py", helper)]));

    let replaying = Arc::new(AtomicBool::new(false));
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let (flag, seen) = (replaying.clone(), seen.clone());
        files.subscribe(Arc::new(move |path: &str| {
            seen.lock().push((path.to_string(), flag.load(Ordering::SeqCst)));
        }));
    }

    let run = Scope::Function("run".into());
    let steps = vec![
        step(1, &[]),
        step(2, &[("helper", VarValue::Repr("<module 'helper' from '/helper.py'>".into()))]),
        step(2, &[]).with_filename("/helper.py").with_scope(run.clone()),
        step(3, &[("y", int(5))]).with_filename("/helper.py").with_scope(run),
    ];
    let mut engine = engine(files.clone(), replaying.clone());
    assert!(engine.start_replay(Arc::new(ExecutionTrace::from_steps(main, steps))));
    assert_eq!(files.active_file().as_deref(), Some(MAIN_FILE));

    files.edit_active("import helper\nhelper.run()\n# edited\n").unwrap();
    assert!(engine.jump_to_step(2));
    assert_eq!(files.active_file().as_deref(), Some("/helper.py"));
    assert!(!files.has_unsaved_edits());
    assert!(files.read_file(MAIN_FILE).unwrap().ends_with("# edited\n"));

    let view = engine.current_view().unwrap();
    assert_eq!(view.filename, "/helper.py");
    assert_eq!(view.variables.get("y"), Some(&int(5)));

    assert!(!engine.notify_code_changed());
    let seen = seen.lock().clone();
    assert!(seen.len() >= 3);
    assert!(seen.iter().all(|(_, replaying)| *replaying));

    engine.stop_replay();
    assert!(!replaying.load(Ordering::SeqCst));
    assert!(engine.current_view().is_none());
}

#[test]
fn test_non_python_frames_display_against_main_file() {
    pyreplay_common::logging::ensure_test_logging(None);
    info!("Running test");
    let source = "x = 1\n";
    let steps = vec![step(1, &[]).with_filename("<string>"), step(1, &[("x", int(1))])];
    let files = Arc::new(MemoryFileManager::with_files([(MAIN_FILE, source)]));
    let mut engine = engine(files.clone(), Arc::new(AtomicBool::new(false)));
    assert!(engine.start_replay(Arc::new(ExecutionTrace::from_steps(source, steps))));

    assert_eq!(engine.current_view().unwrap().filename, MAIN_FILE);
    assert_eq!(files.active_file().as_deref(), Some(MAIN_FILE));
}
