use std::path::PathBuf;

use marquee::app::RunOptions;

const HELP: &str = "marquee: browse TMDB movies from the terminal.

  --version, -V            Show version and exit
  --help,    -h            Show this help message
  --config PATH            Use PATH instead of the default config file
  --set-api-key KEY        Save a TMDB API key to the config file and exit

Environment:
  TMDB_API_KEY             API key used when none is configured
  MARQUEE_<SECTION>__<KEY> Override a config value, e.g. MARQUEE_BROWSE__MAX_PAGES=3
  MARQUEE_LOG              Log filter, e.g. debug or marquee=trace";

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match handle_cli_flags(&args) {
        Ok(Some(options)) => {
            if let Err(err) = marquee::run(options) {
                eprintln!("error: {err:?}");
                std::process::exit(1);
            }
        }
        Ok(None) => {}
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(1);
        }
    }
}

// None when a flag was handled and the UI should not start.
fn handle_cli_flags(args: &[String]) -> anyhow::Result<Option<RunOptions>> {
    let mut options = RunOptions::default();
    let mut api_key: Option<String> = None;
    let mut saw_flag = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("marquee {}", marquee::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!("{HELP}");
                saw_flag = true;
            }
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                options.config_file = Some(PathBuf::from(path));
            }
            "--set-api-key" => {
                let key = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--set-api-key requires a key"))?;
                api_key = Some(key.clone());
            }
            other => anyhow::bail!("unknown argument {other:?} (see --help)"),
        }
    }

    if let Some(key) = api_key {
        let path = marquee::config::save_api_key(options.config_file.clone(), &key)?;
        println!("Saved TMDB API key to {}", path.display());
        return Ok(None);
    }

    Ok((!saw_flag).then_some(options))
}
