//! Command line parsing.

use dnd_sim::Tier;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub scenario: PathBuf,
    pub iterations: Option<u32>,
    pub seed: Option<u64>,
    pub max_k: Option<u32>,
    pub config: Option<PathBuf>,
    /// Encounter to auto-adjust, by position among the day's encounters.
    pub adjust: Option<usize>,
    pub target: Tier,
    /// Re-run a single iteration of the batch at full detail.
    pub run: Option<u32>,
    pub json: bool,
    pub out: Option<PathBuf>,
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(|s| s.as_str())
        .ok_or_else(|| format!("{flag} needs a value"))
}

fn number<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("{flag}: '{raw}' is not a valid number"))
}

/// Parse options from the full argument list, program name included.
pub fn parse(args: &[String]) -> Result<Options, String> {
    let mut scenario = None;
    let mut options = Options {
        scenario: PathBuf::new(),
        iterations: None,
        seed: None,
        max_k: None,
        config: None,
        adjust: None,
        target: Tier::Challenging,
        run: None,
        json: false,
        out: None,
    };

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--scenario" => {
                scenario = Some(PathBuf::from(value(args, i, flag)?));
                i += 1;
            }
            "--iterations" => {
                options.iterations = Some(number(value(args, i, flag)?, flag)?);
                i += 1;
            }
            "--seed" => {
                options.seed = Some(number(value(args, i, flag)?, flag)?);
                i += 1;
            }
            "--max-k" => {
                options.max_k = Some(number(value(args, i, flag)?, flag)?);
                i += 1;
            }
            "--config" => {
                options.config = Some(PathBuf::from(value(args, i, flag)?));
                i += 1;
            }
            "--adjust" => {
                options.adjust = Some(number(value(args, i, flag)?, flag)?);
                i += 1;
            }
            "--target" => {
                let raw = value(args, i, flag)?;
                options.target = raw.parse().map_err(|e| format!("--target: {e}"))?;
                i += 1;
            }
            "--run" => {
                options.run = Some(number(value(args, i, flag)?, flag)?);
                i += 1;
            }
            "--out" => {
                options.out = Some(PathBuf::from(value(args, i, flag)?));
                i += 1;
            }
            "--json" => options.json = true,
            other => return Err(format!("unknown argument '{other}'")),
        }
        i += 1;
    }

    options.scenario = scenario.ok_or_else(|| "--scenario is required".to_string())?;
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("dnd-balance")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_full_command() {
        let options = parse(&args(&[
            "--scenario",
            "day.json",
            "--iterations",
            "5000",
            "--seed",
            "42",
            "--max-k",
            "20",
            "--json",
        ]))
        .unwrap();
        assert_eq!(options.scenario, PathBuf::from("day.json"));
        assert_eq!(options.iterations, Some(5000));
        assert_eq!(options.seed, Some(42));
        assert_eq!(options.max_k, Some(20));
        assert!(options.json);
        assert_eq!(options.adjust, None);
    }

    #[test]
    fn test_parse_adjust() {
        let options = parse(&args(&["--scenario", "day.json", "--adjust", "1", "--target", "boss"]))
            .unwrap();
        assert_eq!(options.adjust, Some(1));
        assert_eq!(options.target, Tier::Boss);
    }

    #[test]
    fn test_parse_single_run() {
        let options = parse(&args(&["--scenario", "day.json", "--seed", "7", "--run", "12"])).unwrap();
        assert_eq!(options.run, Some(12));
        assert!(parse(&args(&["--scenario", "day.json", "--run", "-1"])).is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&args(&[])).is_err());
        assert!(parse(&args(&["--scenario"])).is_err());
        assert!(parse(&args(&["--scenario", "a.json", "--seed", "x"])).is_err());
        assert!(parse(&args(&["--scenario", "a.json", "--target", "deadly"])).is_err());
        assert!(parse(&args(&["--scenario", "a.json", "--bogus"])).is_err());
    }
}
