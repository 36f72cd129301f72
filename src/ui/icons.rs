//! Shared UI icons.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");
pub static TOOL: Emoji<'_, '_> = Emoji("🔧 ", "[>]");
pub static REFUSED: Emoji<'_, '_> = Emoji("🚫 ", "[NO]");
pub static COMPACT: Emoji<'_, '_> = Emoji("📦 ", "[C]");
pub static RESUME: Emoji<'_, '_> = Emoji("🔄 ", "[R]");
pub static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "[X]");
