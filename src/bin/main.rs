use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use regex::Regex;
use tracing::{error, info};

use form_body_parser::{
    BodyParser, FieldMap, FormValue, MemoryFactory, Node, TempFileFactory, UploadedFile,
    UploadedFileFactory,
};

#[derive(Parser)]
#[command(
    name = "form-body-parser",
    about = "Decode url-encoded and multipart/form-data request bodies"
)]
struct Cli {
    /// Body files to decode (- for stdin, default: stdin)
    files: Vec<String>,

    /// Content-Type header value of the body
    #[arg(short = 't', long = "content-type", value_name = "VALUE")]
    content_type: String,

    /// Show decoded fields only
    #[arg(long, group = "output_mode")]
    fields: bool,

    /// Show uploaded files only
    #[arg(long = "files", group = "output_mode")]
    uploads: bool,

    /// Show statistics summary
    #[arg(long, group = "output_mode")]
    stats: bool,

    /// Only show fields and files whose name matches REGEX
    #[arg(short, long, value_name = "REGEX")]
    name: Option<String>,

    /// Keep uploads in memory instead of temporary files
    #[arg(long)]
    memory: bool,

    /// Move every uploaded file into DIR under its client filename
    #[arg(long, value_name = "DIR")]
    save_dir: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn compile_regex(pattern: &str, label: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => {
            eprintln!("invalid {label} regex '{pattern}': {e}");
            process::exit(2);
        }
    }
}

fn open_input(files: &[String]) -> Box<dyn Read> {
    if files.is_empty() || (files.len() == 1 && files[0] == "-") {
        return Box::new(io::stdin().lock());
    }

    let mut readers: Vec<Box<dyn Read>> = Vec::new();
    for path in files {
        if path == "-" {
            readers.push(Box::new(io::stdin().lock()));
        } else {
            match File::open(path) {
                Ok(f) => readers.push(Box::new(f)),
                Err(e) => {
                    eprintln!("{path}: {e}");
                    process::exit(1);
                }
            }
        }
    }

    let mut chain: Box<dyn Read> = readers.remove(0);
    for r in readers {
        chain = Box::new(chain.chain(r));
    }
    chain
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with_writer(io::stderr)
        .init();
}

fn name_matches(filter: Option<&Regex>, name: &str) -> bool {
    filter.map_or(true, |re| re.is_match(name))
}

/// Flatten a nested value into `path=value` lines, `a[b][0]` style.
fn flatten(path: &str, value: &FormValue, out: &mut Vec<(String, String)>) {
    match value {
        Node::Leaf(text) => out.push((path.to_string(), text.clone())),
        Node::Container(entries) => {
            for (key, child) in entries {
                flatten(&format!("{path}[{key}]"), child, out);
            }
        }
    }
}

fn output_fields(fields: Option<&FieldMap>, filter: Option<&Regex>) {
    let Some(fields) = fields else {
        return;
    };
    for (name, value) in fields {
        if !name_matches(filter, name) {
            continue;
        }
        let mut lines = Vec::new();
        flatten(name, value, &mut lines);
        for (path, text) in lines {
            println!("{path}={text}");
        }
    }
}

fn output_uploads<'a>(
    files: impl Iterator<Item = (&'a String, &'a UploadedFile)>,
    filter: Option<&Regex>,
) {
    for (name, file) in files {
        if !name_matches(filter, name) {
            continue;
        }
        println!(
            "{} {} {} {} bytes",
            name,
            file.client_filename().unwrap_or("-"),
            file.client_media_type(),
            file.size(),
        );
    }
}

fn run_stats(parser: &BodyParser, filter: Option<&Regex>) {
    let mut field_count = 0;
    let mut leaf_count = 0;
    if let Some(fields) = parser.fetch_body() {
        for (name, value) in fields {
            if !name_matches(filter, name) {
                continue;
            }
            field_count += 1;
            let mut lines = Vec::new();
            flatten(name, value, &mut lines);
            leaf_count += lines.len();
        }
    }

    let mut file_count = 0;
    let mut total_bytes: u64 = 0;
    for (name, file) in parser.fetch_files() {
        if !name_matches(filter, name) {
            continue;
        }
        file_count += 1;
        total_bytes += file.size();
    }

    println!("content type: {}", parser.content_type());
    if !parser.boundary().is_empty() {
        println!("boundary: {}", parser.boundary());
    }
    println!("fields: {field_count}");
    println!("values: {leaf_count}");
    println!("files: {file_count}");
    println!("file bytes: {total_bytes}");
}

/// Target for a saved upload. Only the last path component of the client
/// filename is used; uploads without one are saved under their field name.
fn save_target(dir: &Path, name: &str, file: &UploadedFile) -> PathBuf {
    let client = file
        .client_filename()
        .and_then(|f| Path::new(f).file_name())
        .filter(|f| !f.is_empty());
    match client {
        Some(f) => dir.join(f),
        None => dir.join(name),
    }
}

fn save_uploads(parser: BodyParser, dir: &Path, filter: Option<&Regex>) -> io::Result<()> {
    for (name, mut file) in parser.into_files() {
        if !name_matches(filter, &name) {
            continue;
        }
        let target = save_target(dir, &name, &file);
        file.move_to(&target)?;
        info!(name = %name, target = %target.display(), "saved upload");
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let filter = cli.name.as_ref().map(|p| compile_regex(p, "name"));

    let mut body = Vec::new();
    if let Err(e) = open_input(&cli.files).read_to_end(&mut body) {
        eprintln!("read error: {e}");
        process::exit(1);
    }

    let factory: &dyn UploadedFileFactory = if cli.memory {
        &MemoryFactory
    } else {
        &TempFileFactory
    };

    let parser = match BodyParser::with_factory(&body, &cli.content_type, factory) {
        Ok(parser) => parser,
        Err(e) => {
            error!("decode failed: {e}");
            process::exit(1);
        }
    };

    if cli.stats {
        run_stats(&parser, filter.as_ref());
    } else if cli.fields {
        output_fields(parser.fetch_body(), filter.as_ref());
    } else if cli.uploads {
        output_uploads(parser.fetch_files().iter(), filter.as_ref());
    } else {
        output_fields(parser.fetch_body(), filter.as_ref());
        output_uploads(parser.fetch_files().iter(), filter.as_ref());
    }

    if let Some(dir) = &cli.save_dir {
        if let Err(e) = save_uploads(parser, dir, filter.as_ref()) {
            eprintln!("save error: {e}");
            process::exit(1);
        }
    }
}
