// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use owo_colors::Style;

#[derive(Debug, Default, Clone)]
pub(super) struct Styles {
    pub(super) is_colorized: bool,
    pub(super) count: Style,
    pub(super) pass: Style,
    pub(super) recovered: Style,
    pub(super) fail: Style,
    pub(super) abort: Style,
    pub(super) seed: Style,
}

impl Styles {
    pub(super) fn colorize(&mut self) {
        self.is_colorized = true;
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.recovered = Style::new().magenta().bold();
        self.fail = Style::new().red().bold();
        self.abort = Style::new().yellow().bold();
        self.seed = Style::new().blue().bold();
    }
}
