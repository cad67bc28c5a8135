// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use bk_client_core::{cfg::logger::init_logger, cli, model::ServerAddress};

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logger("config/logger.yaml")?;

    cli::run("config/client.yaml", ServerAddress::new("127.0.0.1", 3181)).await
}
