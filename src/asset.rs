use std::fmt;

/// The two daily streams the pipeline knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum AssetClass {
    /// Cash-market bhavcopy, one zipped CSV per trading day.
    Equity,
    /// Index closing snapshot, one plain CSV per trading day.
    Index,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Equity => "equity",
            AssetClass::Index => "index",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
