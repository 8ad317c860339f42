// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use chrono::Utc;

fn main() {
    let datetime = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    println!("cargo:rustc-env=BUILD_DATETIME={datetime}");
    println!("cargo:rerun-if-changed=build.rs");
}
