//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Chain indicators
pub static CHAIN: Emoji<'_, '_> = Emoji("🔗 ", "[C]");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static RESUME: Emoji<'_, '_> = Emoji("🔄 ", "[R]");
pub static PROGRESS: Emoji<'_, '_> = Emoji("📊 ", "[PROG]");
pub static ABANDONED: Emoji<'_, '_> = Emoji("🗑️  ", "[-]");
