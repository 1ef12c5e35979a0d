use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_LOCALE: &str = "en-US";

fn main() {
    println!("cargo:rerun-if-changed=locales");

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR must be set");
    let locales_dir = PathBuf::from(manifest_dir).join("locales");
    let mut locales = Vec::new();
    let mut entries = fs::read_dir(&locales_dir)
        .expect("locales directory must exist")
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect::<Vec<_>>();
    entries.sort();

    for path in entries {
        let tag = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .expect("locale file name must be valid UTF-8")
            .to_string();
        locales.push((tag, load_catalog(&path)));
    }

    assert!(
        locales.iter().any(|(tag, _)| tag == DEFAULT_LOCALE),
        "default locale catalog locales/{DEFAULT_LOCALE}.toml is missing"
    );

    let mut output = String::new();
    writeln!(output, "pub const DEFAULT_LOCALE: &str = {DEFAULT_LOCALE:?};").unwrap();
    writeln!(
        output,
        "pub static LOCALES: &[(&str, &[(&str, &str)])] = &["
    )
    .unwrap();
    for (tag, catalog) in &locales {
        writeln!(output, "    ({tag:?}, &[").unwrap();
        for (key, value) in catalog {
            writeln!(output, "        ({key:?}, {value:?}),").unwrap();
        }
        writeln!(output, "    ]),").unwrap();
    }
    writeln!(output, "];").unwrap();

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR must be set"));
    fs::write(out_dir.join("formloom_i18n_generated.rs"), output)
        .expect("writing generated i18n catalog must succeed");
}

fn load_catalog(path: &Path) -> Vec<(String, String)> {
    let raw = fs::read_to_string(path)
        .unwrap_or_else(|error| panic!("reading {} failed: {error}", path.display()));
    let table = raw
        .parse::<toml::Table>()
        .unwrap_or_else(|error| panic!("parsing {} failed: {error}", path.display()));

    let mut catalog = Vec::new();
    flatten_table(&table, String::new(), &mut catalog);
    catalog.sort();
    catalog
}

fn flatten_table(table: &toml::Table, prefix: String, catalog: &mut Vec<(String, String)>) {
    for (key, value) in table {
        let composed = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::String(text) => catalog.push((composed, text.clone())),
            toml::Value::Table(nested) => flatten_table(nested, composed, catalog),
            other => panic!("unsupported value for i18n key {composed}: {other:?}"),
        }
    }
}
