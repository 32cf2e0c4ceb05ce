use std::env;
use std::io::{self, BufRead};

use anyhow::{bail, Context, Result};

use ecombot::auth::password::{hash_password, validate_new_password};

fn main() -> Result<()> {
    let password = match env::args().nth(1) {
        Some(password) => password,
        None => {
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .context("failed to read password from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };

    if let Err(reason) = validate_new_password(&password) {
        bail!("{reason}");
    }

    println!("{}", hash_password(&password)?);
    Ok(())
}
