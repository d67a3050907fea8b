//! A small CLI tool for checking kiosk vote receipts.
//! This uses the server's own integrity hash, so it always agrees with the
//! receipts the kiosk prints.

use std::collections::BTreeMap;

use clap::{Arg, ArgAction, ArgMatches, Command};

use kiosk_backend::model::{
    catalogue::CandidateId,
    session::{Category, IntegrityHash, VoteToken},
};

const PROGRAM_NAME: &str = "receipt-check";

const ABOUT_TEXT: &str = "Recompute the integrity hash of a kiosk vote.

EXIT CODES:
     0: Hash printed, or it matched the expected value.
   255: Ran successfully, but the hash did not match.
 Other: Error.";

const TOKEN: &str = "TOKEN";
const CHOICES: &str = "CHOICES";
const EXPECT: &str = "expect";

const CHOICES_HELP: &str = "One `CATEGORY=CANDIDATE_ID` pair per race, e.g. `MNA=cand-1`";

const EXPECT_HELP: &str = "The hash printed on the receipt. A trailing `...` \
(as on the shortened preview) compares only the shown prefix";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .arg(
            Arg::new(TOKEN)
                .help("The voting token used for the vote")
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(CHOICES)
                .help(CHOICES_HELP)
                .action(ArgAction::Append)
                .num_args(1..)
                .required(true),
        )
        .arg(
            Arg::new(EXPECT)
                .long(EXPECT)
                .short('e')
                .help(EXPECT_HELP)
                .action(ArgAction::Set),
        )
}

/// Errors that this program may produce.
#[derive(Debug, Eq, PartialEq)]
enum Error {
    /// The arguments could not be understood, for the contained reason.
    Usage(String),
    /// The recomputed hash differs from the expected one.
    Mismatch { computed: IntegrityHash },
}

/// Parse `CATEGORY=CANDIDATE_ID` pairs, rejecting repeated categories.
fn parse_choices<'a>(
    pairs: impl Iterator<Item = &'a String>,
) -> Result<BTreeMap<Category, CandidateId>, Error> {
    let mut choices = BTreeMap::new();
    for pair in pairs {
        let (category, candidate) = pair
            .split_once('=')
            .map(|(c, id)| (c.trim(), id.trim()))
            .filter(|(c, id)| !c.is_empty() && !id.is_empty())
            .ok_or_else(|| Error::Usage(format!("'{pair}' is not CATEGORY=CANDIDATE_ID")))?;
        let category = Category::new(category);
        if choices.contains_key(&category) {
            return Err(Error::Usage(format!("Category {category} given twice")));
        }
        choices.insert(category, CandidateId::new(candidate));
    }
    Ok(choices)
}

/// Does `expected` (full or shortened) describe `computed`?
fn describes(computed: &IntegrityHash, expected: &str) -> bool {
    let expected = expected.trim().to_lowercase();
    match expected.strip_suffix("...") {
        Some(prefix) => !prefix.is_empty() && computed.as_str().starts_with(prefix),
        None => computed.as_str() == expected,
    }
}

/// Recompute the hash and compare it if asked to.
fn check(args: &ArgMatches) -> Result<IntegrityHash, Error> {
    // Required arguments are guaranteed to be present.
    let token: &String = args.get_one(TOKEN).unwrap();
    let token = token
        .parse::<VoteToken>()
        .map_err(|e| Error::Usage(e.to_string()))?;
    let choices = parse_choices(args.get_many::<String>(CHOICES).unwrap())?;

    let computed = IntegrityHash::derive(&token, &choices);
    match args.get_one::<String>(EXPECT) {
        Some(expected) if !describes(&computed, expected) => Err(Error::Mismatch { computed }),
        _ => Ok(computed),
    }
}

/// Run the check, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    match check(args) {
        Ok(hash) => {
            println!("{hash}");
            if args.contains_id(EXPECT) {
                println!("Receipt matches.");
            }
            0
        }
        Err(Error::Mismatch { computed }) => {
            println!("{computed}");
            println!("Receipt does not match: the vote or token differs.");
            255
        }
        Err(Error::Usage(msg)) => {
            println!("Invalid arguments: {msg}");
            1
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}
