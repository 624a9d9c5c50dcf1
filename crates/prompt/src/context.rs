//! Dynamic context prefix for a turn.  Pure assembly: the caller supplies
//! the clock reading and pre-loaded inputs; absent inputs emit no block.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;

use lexgate_instance::{ContextSettings, InstanceFile};

pub struct ContextInputs<'a> {
    pub settings: &'a ContextSettings,
    pub display_name: Option<&'a str>,
    pub general_context: Option<&'a str>,
    pub instance_files: &'a [InstanceFile],
    pub now: DateTime<Utc>,
}

const WEEKDAYS_ES: [&str; 7] = [
    "lunes", "martes", "miércoles", "jueves", "viernes", "sábado", "domingo",
];
const WEEKDAYS_EN: [&str; 7] = [
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
];
const MONTHS_ES: [&str; 12] = [
    "enero", "febrero", "marzo", "abril", "mayo", "junio", "julio", "agosto",
    "septiembre", "octubre", "noviembre", "diciembre",
];
const MONTHS_EN: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August",
    "September", "October", "November", "December",
];

/// Assemble the context prefix.  Blocks are joined with blank lines; an
/// entirely empty context yields an empty string.
pub fn build_context(inputs: &ContextInputs<'_>) -> String {
    let mut blocks: Vec<String> = Vec::new();

    if let Some(block) = system_block(inputs) {
        blocks.push(block);
    }
    if let Some(name) = inputs.display_name.filter(|n| !n.trim().is_empty()) {
        blocks.push(user_block(name, &inputs.settings.locale));
    }
    if let Some(general) = inputs.general_context.filter(|g| !g.trim().is_empty()) {
        let header = if spanish(&inputs.settings.locale) {
            "CONTEXTO GENERAL DEL USUARIO:"
        } else {
            "USER GENERAL CONTEXT:"
        };
        blocks.push(format!("{header}\n{}", general.trim()));
    }
    if !inputs.instance_files.is_empty() {
        blocks.push(files_block(inputs.instance_files, &inputs.settings.locale));
    }

    blocks.join("\n\n")
}

fn spanish(locale: &str) -> bool {
    locale.to_lowercase().starts_with("es")
}

fn system_block(inputs: &ContextInputs<'_>) -> Option<String> {
    let settings = inputs.settings;
    if !settings.inject_datetime && !settings.inject_locale {
        return None;
    }

    let mut lines = Vec::new();
    let es = spanish(&settings.locale);
    lines.push(if es { "CONTEXTO DEL SISTEMA:" } else { "SYSTEM CONTEXT:" }.to_string());

    if settings.inject_datetime {
        let tz: Tz = settings.timezone.parse().unwrap_or(chrono_tz::UTC);
        let local = inputs.now.with_timezone(&tz);
        let weekday_idx = local.weekday().num_days_from_monday() as usize;
        let month_idx = local.month0() as usize;
        let (weekday, month) = if es {
            (WEEKDAYS_ES[weekday_idx], MONTHS_ES[month_idx])
        } else {
            (WEEKDAYS_EN[weekday_idx], MONTHS_EN[month_idx])
        };
        if es {
            lines.push(format!(
                "Hoy es {weekday} {} de {month} de {}.",
                local.day(),
                local.year()
            ));
            lines.push(format!(
                "Hora local: {:02}:{:02} ({}).",
                local.hour(),
                local.minute(),
                settings.timezone
            ));
            lines.push(format!("Marca de tiempo Unix: {}.", inputs.now.timestamp()));
        } else {
            lines.push(format!(
                "Today is {weekday}, {month} {}, {}.",
                local.day(),
                local.year()
            ));
            lines.push(format!(
                "Local time: {:02}:{:02} ({}).",
                local.hour(),
                local.minute(),
                settings.timezone
            ));
            lines.push(format!("Unix timestamp: {}.", inputs.now.timestamp()));
        }
    }

    if settings.inject_locale {
        if es {
            lines.push(format!("País: {}. Idioma: {}.", settings.country, settings.locale));
        } else {
            lines.push(format!("Country: {}. Locale: {}.", settings.country, settings.locale));
        }
    }

    Some(lines.join("\n"))
}

fn user_block(name: &str, locale: &str) -> String {
    if spanish(locale) {
        format!(
            "CONTEXTO DEL USUARIO:\nEl usuario se llama {name}. \
             Dirígete a él por su nombre cuando resulte natural."
        )
    } else {
        format!(
            "USER CONTEXT:\nThe user's name is {name}. \
             Address them by name when it feels natural."
        )
    }
}

fn files_block(files: &[InstanceFile], locale: &str) -> String {
    let header = if spanish(locale) {
        "ARCHIVOS DE CONOCIMIENTO DE LA INSTANCIA:"
    } else {
        "INSTANCE KNOWLEDGE FILES:"
    };
    let mut out = String::from(header);
    for file in files {
        out.push_str(&format!("\n\n=== {} ===\n{}", file.name, file.content));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_settings() -> ContextSettings {
        ContextSettings {
            inject_datetime: true,
            inject_locale: false,
            timezone: "America/Santiago".to_string(),
            locale: "es".to_string(),
            country: "Chile".to_string(),
        }
    }

    fn at(settings: &ContextSettings) -> ContextInputs<'_> {
        ContextInputs {
            settings,
            display_name: None,
            general_context: None,
            instance_files: &[],
            now: Utc.with_ymd_and_hms(2026, 1, 14, 18, 30, 0).unwrap(),
        }
    }

    #[test]
    fn datetime_block_in_spanish() {
        let settings = base_settings();
        let context = build_context(&at(&settings));
        // 2026-01-14 18:30 UTC is a Wednesday; Santiago is UTC-3 in January.
        assert!(context.contains("CONTEXTO DEL SISTEMA:"));
        assert!(context.contains("miércoles 14 de enero de 2026"));
        assert!(context.contains("Hora local: 15:30 (America/Santiago)."));
        assert!(context.contains("Marca de tiempo Unix:"));
    }

    #[test]
    fn locale_block_when_enabled() {
        let mut settings = base_settings();
        settings.inject_locale = true;
        let context = build_context(&at(&settings));
        assert!(context.contains("País: Chile. Idioma: es."));
    }

    #[test]
    fn english_rendering() {
        let mut settings = base_settings();
        settings.locale = "en".to_string();
        let context = build_context(&at(&settings));
        assert!(context.contains("Today is Wednesday, January 14, 2026."));
    }

    #[test]
    fn user_and_general_blocks() {
        let settings = base_settings();
        let mut inputs = at(&settings);
        inputs.display_name = Some("María");
        inputs.general_context = Some("Trabaja en una pyme de transporte.");

        let context = build_context(&inputs);
        assert!(context.contains("El usuario se llama María."));
        assert!(context.contains("Trabaja en una pyme de transporte."));
    }

    #[test]
    fn files_block_labels_each_file() {
        let settings = base_settings();
        let files = vec![
            InstanceFile { name: "tarifas.txt".to_string(), content: "Tarifa A".to_string() },
            InstanceFile { name: "zonas.txt".to_string(), content: "Zona 1".to_string() },
        ];
        let mut inputs = at(&settings);
        inputs.instance_files = &files;

        let context = build_context(&inputs);
        assert!(context.contains("=== tarifas.txt ==="));
        assert!(context.contains("=== zonas.txt ==="));
    }

    #[test]
    fn absent_inputs_emit_nothing() {
        let mut settings = base_settings();
        settings.inject_datetime = false;
        let context = build_context(&at(&settings));
        assert!(context.is_empty());
    }
}
