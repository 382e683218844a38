// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::Context;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    println!("cargo::rerun-if-env-changed={}", build_clk_tree::CONFIG_ENV);
    let path = match std::env::var_os(build_clk_tree::CONFIG_ENV) {
        Some(p) => PathBuf::from(p),
        None => PathBuf::from("clock-tree.toml"),
    };
    println!("cargo::rerun-if-changed={}", path.display());

    let tree = build_clk_tree::TreeConfig::load(&path)?;
    let generated = tree.render()?;

    let out_dir = PathBuf::from(
        std::env::var_os("OUT_DIR").context("OUT_DIR not set")?,
    );
    let dest = out_dir.join("clock_tree.rs");
    std::fs::write(&dest, generated)
        .with_context(|| format!("writing {}", dest.display()))?;
    Ok(())
}
