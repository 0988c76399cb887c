use opcode_insertion::jvm::class_file::ClassFile;
use opcode_insertion::jvm::class_graph::ClassGraph;
use opcode_insertion::rewrite::ReservedNames;
use opcode_insertion::transform::{self, FailurePolicy, Settings, Transformed};

use clap::{command, value_parser, Arg, ArgAction};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use walkdir::WalkDir;

fn main() {
    env_logger::init();

    let matches = command!()
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Write classes under this directory instead of rewriting them in place"),
        )
        .arg(
            Arg::new("all")
                .long("all")
                .action(ArgAction::SetTrue)
                .help("Rewrite classes even if they don't have the marker annotation"),
        )
        .arg(
            Arg::new("keep-going")
                .long("keep-going")
                .action(ArgAction::SetTrue)
                .help("Leave classes that fail to be rewritten as they are, instead of stopping"),
        )
        .arg(
            Arg::new("runtime-package")
                .long("runtime-package")
                .value_name("PKG")
                .default_value(ReservedNames::DEFAULT_PACKAGE)
                .help("Package of the placeholder runtime classes (eg. `ru/DmN/bul`)"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Class files, or directories to search for class files")
                .required(true)
                .num_args(1..)
                .value_parser(value_parser!(PathBuf)),
        )
        .get_matches();

    let runtime_package = matches
        .get_one::<String>("runtime-package")
        .map_or(ReservedNames::DEFAULT_PACKAGE, String::as_str);
    let mut settings = Settings::new(runtime_package);
    settings.require_marker = !matches.get_flag("all");
    if matches.get_flag("keep-going") {
        settings.failure_policy = FailurePolicy::KeepOriginal;
    }

    let output = matches.get_one::<PathBuf>("output").map(PathBuf::as_path);
    let inputs: Vec<&PathBuf> = matches
        .get_many::<PathBuf>("INPUT")
        .into_iter()
        .flatten()
        .collect();

    for input in &inputs {
        if let Err(err) = load_classes(input, &mut settings.classes) {
            log::error!("{}", err);
            process::exit(1);
        }
    }

    let mut rewritten = 0;
    for input in inputs {
        match process_input(input, output, &settings) {
            Ok(count) => rewritten += count,
            Err(err) => {
                log::error!("{}", err);
                process::exit(1);
            }
        }
    }
    log::info!("Rewrote {} class file(s)", rewritten);
}

/// Transform every class file in an input, returning how many were rewritten
fn process_input(
    input: &Path,
    output: Option<&Path>,
    settings: &Settings,
) -> Result<usize, CliError> {
    let mut rewritten = 0;
    for (path, relative) in class_files(input)? {
        log::debug!("Reading '{}'", path.display());
        let bytes = fs::read(&path).map_err(|err| CliError::Io(path.clone(), err))?;
        let transformed = transform::transform_class(&bytes, settings)
            .map_err(|err| CliError::Transform(path.clone(), err))?;

        let destination = output.map(|dir| dir.join(&relative));
        let contents = match (&transformed, &destination) {
            (Transformed::Rewritten { bytes, .. }, _) => bytes,
            (Transformed::Unchanged, Some(_)) => &bytes,
            (Transformed::Unchanged, None) => continue,
        };
        let destination = destination.unwrap_or_else(|| path.clone());

        log::info!("Writing '{}'", destination.display());
        write_file(&destination, contents).map_err(|err| CliError::Io(destination, err))?;
        if let Transformed::Rewritten { .. } = transformed {
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

/// Add every class in an input to the class graph
///
/// Classes that can't be parsed are skipped here: rewriting them will report the problem.
fn load_classes(input: &Path, classes: &mut ClassGraph) -> Result<(), CliError> {
    for (path, _) in class_files(input)? {
        let bytes = fs::read(&path).map_err(|err| CliError::Io(path.clone(), err))?;
        let added = ClassFile::parse(&bytes).and_then(|class| classes.add_class_file(&class));
        if let Err(err) = added {
            log::debug!("Not adding '{}' to the class graph: {:?}", path.display(), err);
        }
    }
    Ok(())
}

/// Class files under an input, each with its path relative to the input
///
/// An input which is itself a file is taken as a class file, whatever its extension.
fn class_files(input: &Path) -> Result<Vec<(PathBuf, PathBuf)>, CliError> {
    if input.is_file() {
        let relative = input.file_name().map_or_else(PathBuf::new, PathBuf::from);
        return Ok(vec![(input.to_path_buf(), relative)]);
    }

    let mut files = vec![];
    for entry in WalkDir::new(input).sort_by(|a, b| a.file_name().cmp(b.file_name())) {
        let entry = entry.map_err(CliError::Walk)?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().map_or(false, |ext| ext == "class") {
            let relative = path.strip_prefix(input).unwrap_or(path).to_path_buf();
            files.push((path.to_path_buf(), relative));
        }
    }
    Ok(files)
}

fn write_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}

#[derive(Debug)]
enum CliError {
    Io(PathBuf, io::Error),
    Walk(walkdir::Error),
    Transform(PathBuf, transform::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Io(path, err) => write!(f, "'{}': {}", path.display(), err),
            CliError::Walk(err) => write!(f, "{}", err),
            CliError::Transform(path, err) => write!(f, "'{}': {}", path.display(), err),
        }
    }
}
