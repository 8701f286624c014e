use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(TestType {
    Blood => "blood",
    Urine => "urine",
    XRay => "x_ray",
    Mri => "mri",
    Ct => "ct",
    Ultrasound => "ultrasound",
    Ecg => "ecg",
    VaccinationCard => "vaccination_card",
    Allergy => "allergy",
    Other => "other",
});

impl TestType {
    /// Human-readable label, also used as the hint for image analysis.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Blood => "Blood test",
            Self::Urine => "Urine test",
            Self::XRay => "X-ray",
            Self::Mri => "MRI scan",
            Self::Ct => "CT scan",
            Self::Ultrasound => "Ultrasound",
            Self::Ecg => "ECG",
            Self::VaccinationCard => "Vaccination card",
            Self::Allergy => "Allergy test",
            Self::Other => "Medical document",
        }
    }

    /// Label for a stored test type string; unknown kinds are shown verbatim.
    pub fn label_for(test_type: &str) -> String {
        test_type
            .parse::<TestType>()
            .map(|t| t.label().to_string())
            .unwrap_or_else(|_| test_type.to_string())
    }
}

str_enum!(AiProvider {
    OpenAi => "openai",
    Anthropic => "anthropic",
    Gemini => "gemini",
});
