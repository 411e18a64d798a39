//! Init command: generate a fresh storage code

use anyhow::Result;
use tidevault_core::generate_storage_code;

pub fn run() -> Result<()> {
    let code = generate_storage_code();
    println!("Storage code: {code}");
    println!();
    println!("Keep this code together with your password; both are required");
    println!("to reach the vault, and neither can be recovered if lost.");
    println!("Export it as TIDEVAULT_STORAGE_CODE to avoid passing it on the");
    println!("command line.");
    Ok(())
}
