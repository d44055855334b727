use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn autolearn(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autolearn"))
        .args(args)
        .current_dir(cwd)
        .env("RUST_LOG", "warn")
        .output()
        .expect("run autolearn")
}

fn write_csvs(dir: &Path) {
    fs::write(
        dir.join("courses.csv"),
        "slug,code,title,summary,credits,duration_hours,level\n\
         example-course,EX101,Example Course,An example,3,40,intro\n",
    )
    .expect("courses");
    fs::write(
        dir.join("modules.csv"),
        "course_slug,module_slug,title,module_id,sequence_number\n\
         example-course,module-1,Module One,1,1\n",
    )
    .expect("modules");
    fs::write(
        dir.join("lessons.csv"),
        "course_slug,module_slug,lesson_slug,title,lesson_id,lesson_type\n\
         example-course,module-1,lesson-1,Lesson One,1,lab\n",
    )
    .expect("lessons");
}

const PAGES_ARGS: [&str; 9] = [
    "pages",
    "--courses",
    "courses.csv",
    "--modules",
    "modules.csv",
    "--lessons",
    "lessons.csv",
    "--out",
    "pages",
];

#[test]
fn generated_tree_passes_strict_validation() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_csvs(dir.path());

    let generated = autolearn(&PAGES_ARGS, dir.path());
    assert!(generated.status.success(), "{}", String::from_utf8_lossy(&generated.stderr));

    let course = dir.path().join("pages").join("example-course");
    assert!(course.join("index.md").is_file());
    assert!(course.join("modules").join("module-1.md").is_file());
    assert!(course.join("lessons").join("lesson-1.md").is_file());

    let checked = autolearn(
        &[
            "check-pages",
            "pages",
            "--strict",
            "--report",
            "report.json",
            "--modules-csv",
            "modules.csv",
            "--lessons-csv",
            "lessons.csv",
        ],
        dir.path(),
    );
    assert!(checked.status.success(), "{}", String::from_utf8_lossy(&checked.stderr));

    let report = fs::read_to_string(dir.path().join("report.json")).expect("report");
    assert!(report.contains("\"status\": \"passed\""));
}

#[test]
fn rerun_leaves_edited_pages_alone_unless_forced() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_csvs(dir.path());
    assert!(autolearn(&PAGES_ARGS, dir.path()).status.success());

    let lesson = dir.path().join("pages/example-course/lessons/lesson-1.md");
    let edited = fs::read_to_string(&lesson).expect("lesson") + "\nInstructor notes.\n";
    fs::write(&lesson, &edited).expect("edit");

    assert!(autolearn(&PAGES_ARGS, dir.path()).status.success());
    assert_eq!(fs::read_to_string(&lesson).expect("lesson"), edited);

    let mut forced = PAGES_ARGS.to_vec();
    forced.push("--force");
    assert!(autolearn(&forced, dir.path()).status.success());
    assert!(!fs::read_to_string(&lesson).expect("lesson").contains("Instructor notes."));
}

#[test]
fn tree_missing_course_index_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_csvs(dir.path());
    assert!(autolearn(&PAGES_ARGS, dir.path()).status.success());
    fs::remove_file(dir.path().join("pages/example-course/index.md")).expect("remove index");

    let checked = autolearn(&["check-pages", "pages"], dir.path());
    assert!(!checked.status.success());
    assert_eq!(checked.status.code(), Some(1));
}
