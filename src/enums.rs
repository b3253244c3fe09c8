use serde::{Deserialize, Serialize};

/// The three orthogonal viewing planes. Each one fixes a single axis of the
/// `(slice, row, column)` volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Coronal,
        Orientation::Sagittal,
    ];

    /// Index of the volume axis this orientation fixes.
    pub fn axis(self) -> usize {
        match self {
            Orientation::Axial => 0,
            Orientation::Coronal => 1,
            Orientation::Sagittal => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Resample coronal and sagittal images to isotropic pixels.
    Bilinear,
    #[default]
    None,
}

/// Ordering applied to the files of one series during enumeration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    InstanceNumber,
    None,
}

/// Arrangement of simultaneously displayed views.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ViewLayout {
    #[default]
    Single,
    /// Axial, coronal and sagittal side by side.
    Row,
    /// 2x2 grid with a 3-D preview placeholder in the last cell.
    Grid,
}

impl ViewLayout {
    /// `(columns, rows)` of tiles.
    pub fn tiles(self) -> (u32, u32) {
        match self {
            ViewLayout::Single => (1, 1),
            ViewLayout::Row => (3, 1),
            ViewLayout::Grid => (2, 2),
        }
    }
}

/// Post-window cosmetic stage. Never fused into the window transform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayTransform {
    #[default]
    Identity,
    Negative,
}

/// Where the "Default" window preset takes its intensity range from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoWindow {
    #[default]
    FullVolume,
    PerSlice,
}
