//! Bakes an optional game definition into the binary.
//!
//! `SCRIPTIDLE_EMBED_GAME_PATH` names a JSON game definition. It must parse as a
//! JSON object; when unset the embedded definition is `{}` and the built-in game
//! is used.

use std::env;
use std::fs;
use std::path::Path;

const EMBED_VAR: &str = "SCRIPTIDLE_EMBED_GAME_PATH";

fn embedded_definition() -> Result<String, String> {
    let Ok(path) = env::var(EMBED_VAR) else {
        return Ok("{}".to_string());
    };
    println!("cargo:rerun-if-changed={path}");
    let text = fs::read_to_string(&path).map_err(|e| format!("{EMBED_VAR}={path}: {e}"))?;
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(serde_json::Value::Object(_)) => Ok(text),
        Ok(_) => Err(format!("{EMBED_VAR}={path}: game definition must be a JSON object")),
        Err(e) => Err(format!("{EMBED_VAR}={path}: invalid JSON: {e}")),
    }
}

fn main() {
    println!("cargo:rerun-if-env-changed={EMBED_VAR}");

    let content = match embedded_definition() {
        Ok(content) => content,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
    };

    let Some(out_dir) = env::var_os("OUT_DIR") else {
        eprintln!("error: OUT_DIR not set");
        std::process::exit(1);
    };
    let out_path = Path::new(&out_dir).join("scriptidle_embedded_game.json");
    if let Err(e) = fs::write(&out_path, content) {
        eprintln!("error: writing {}: {e}", out_path.display());
        std::process::exit(1);
    }
}
