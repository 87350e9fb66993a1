//! Field maps turning extracted records into destination rows, one mapper
//! per entity. Mappers for keyed entities return `None` when the merge key
//! cannot be resolved to a positive integer; such records are dropped and
//! counted, never written with a placeholder key.

use serde_json::{json, Map, Value};

use fleetsync_soap::RawRecord;

use crate::normalize;

/// One destination row, with its merge key when the entity is keyed.
#[derive(Debug, Clone)]
pub struct MappedRow {
    pub key: Option<i64>,
    pub row: Value,
}

pub type RowMapper = fn(&RawRecord, &str) -> Option<MappedRow>;

fn text_col(record: &RawRecord, field: &str, max_len: usize) -> Value {
    json!(normalize::text(record.get(field), Some(max_len)))
}

fn int_col(record: &RawRecord, field: &str) -> Value {
    json!(normalize::int(record.get(field)))
}

fn decimal_col(record: &RawRecord, field: &str) -> Value {
    json!(normalize::decimal(record.get(field)))
}

/// The raw payload serialized verbatim, kept next to the normalized columns
/// for forward compatibility with source fields we do not map yet.
fn raw_json(record: &RawRecord) -> Value {
    match serde_json::to_string(record) {
        Ok(serialized) => Value::String(serialized),
        Err(_) => Value::Null,
    }
}

/// Planning-type reference record (step 0). Keyed by its textual code; rows
/// without one are dropped.
pub fn reference_row(record: &RawRecord, now: &str) -> Option<MappedRow> {
    let code = normalize::text(record.get("TYPEPLANNING"), Some(50))?;
    let row = json!({
        "id_wtypepla": int_col(record, "IDWTYPEPLA"),
        "code": code,
        "nb_visites": int_col(record, "NB_VISITES"),
        "libelle": text_col(record, "LIBELLEPLAN", 200),
        "updated_at": now,
    });
    Some(MappedRow { key: None, row })
}

/// Currently-stopped device (step 1). Real-time current truth: not keyed,
/// the table is wiped and repopulated on every fetch.
pub fn alert_row(record: &RawRecord, now: &str) -> Option<MappedRow> {
    let row = json!({
        "id_wsoucont": int_col(record, "nIDSOUCONT"),
        "id_panne": int_col(record, "nClepanne"),
        "date_appel": text_col(record, "sDateAppel", 20),
        "heure_appel": text_col(record, "sHeureAppel", 20),
        "motif": text_col(record, "sMotifAppel", 500),
        "demandeur": text_col(record, "sDemandeur", 100),
        "updated_at": now,
    });
    Some(MappedRow { key: None, row })
}

const MONTH_COLS: [&str; 12] = [
    "jan", "fev", "mar", "avr", "mai", "jui", "jul", "aou", "sep", "oct", "nov", "dec",
];

/// Primary equipment record (step 2), upserted by `id_wsoucont`.
pub fn equipment_row(record: &RawRecord, now: &str) -> Option<MappedRow> {
    let key = normalize::positive_key(record, "IDWSOUCONT")?;

    let mut row = Map::new();
    row.insert("id_wsoucont".into(), json!(key));
    row.insert("id_wcontrat".into(), int_col(record, "IDWCONTRAT"));
    row.insert("secteur".into(), int_col(record, "SECTEUR"));
    row.insert("ascenseur".into(), text_col(record, "ASCENSEUR", 50));
    row.insert("indice".into(), int_col(record, "INDICE"));
    row.insert("adresse".into(), text_col(record, "DES2", 200));
    row.insert("ville".into(), text_col(record, "DES3", 200));
    row.insert("code_postal".into(), text_col(record, "DES3", 5));
    row.insert("genre".into(), int_col(record, "GENRE"));
    row.insert("type_appareil".into(), text_col(record, "TYPE", 50));
    row.insert("marque".into(), text_col(record, "DIV1", 100));
    row.insert("modele".into(), text_col(record, "DIV2", 100));
    row.insert("num_serie".into(), text_col(record, "DIV7", 100));
    for n in [4, 6, 7] {
        row.insert(format!("des{n}"), text_col(record, &format!("DES{n}"), 200));
    }
    // free-form classification slots, carried through as-is
    for n in 1..=15 {
        row.insert(format!("div{n}"), text_col(record, &format!("DIV{n}"), 100));
    }
    row.insert("refcli".into(), text_col(record, "REFCLI", 100));
    row.insert("refcli2".into(), text_col(record, "REFCLI2", 100));
    row.insert("refcli3".into(), text_col(record, "REFCLI3", 100));
    row.insert("numappcli".into(), text_col(record, "NUMAPPCLI", 50));
    row.insert("nom_convivial".into(), text_col(record, "NOM_CONVIVIAL", 100));
    row.insert("localisation".into(), text_col(record, "LOCALISATION", 200));
    row.insert("telcabine".into(), text_col(record, "TELCABINE", 50));
    row.insert("idtype_depannage".into(), int_col(record, "IDTYPE_DEPANNAGE"));
    row.insert("securite".into(), int_col(record, "SECURITE"));
    row.insert("securite2".into(), int_col(record, "SECURITE2"));
    row.insert("typeplanning".into(), text_col(record, "TYPEPLANNING", 50));
    row.insert("wordre".into(), int_col(record, "WORDRE"));
    row.insert("ordre2".into(), int_col(record, "ORDRE2"));
    row.insert("code_acquittement".into(), text_col(record, "CODE_ACQUITTEMENT", 50));
    row.insert("date_heure_modif".into(), text_col(record, "DATE_HEURE_MODIF", 30));
    // monthly visit-plan counters
    for col in MONTH_COLS {
        row.insert(col.into(), int_col(record, &col.to_ascii_uppercase()));
    }
    row.insert("data_wsoucont".into(), raw_json(record));
    row.insert("updated_at".into(), json!(now));

    Some(MappedRow {
        key: Some(key),
        row: Value::Object(row),
    })
}

/// Visit-history fields (step 2b), merged into the existing equipment row
/// via an update rather than an upsert: the row must already exist from
/// step 2.
pub fn visit_history_row(record: &RawRecord, now: &str) -> Option<MappedRow> {
    let key = normalize::positive_key(record, "IDWSOUCONT")?;

    let mut row = Map::new();
    // ten visit label/date pairs
    for n in 1..=10 {
        row.insert(format!("lib{n}"), text_col(record, &format!("LIB{n}"), 100));
        row.insert(
            format!("datepass{n}"),
            int_col(record, &format!("DATEPASS{n}")),
        );
    }
    for n in 1..=15 {
        row.insert(format!("dat{n}"), int_col(record, &format!("DAT{n}")));
    }
    for n in 1..=5 {
        row.insert(format!("txt{n}"), text_col(record, &format!("TXT{n}"), 500));
    }
    row.insert("data_wsoucont2".into(), raw_json(record));
    row.insert("updated_at".into(), json!(now));

    Some(MappedRow {
        key: Some(key),
        row: Value::Object(row),
    })
}

/// Historical fault record (step 3), upserted by `id_panne`. Overlapping
/// period windows re-surface the same faults; the destination merge absorbs
/// the duplicates.
pub fn fault_row(record: &RawRecord, now: &str) -> Option<MappedRow> {
    let key = normalize::positive_key(record, "IDWPANNE")?;
    let row = json!({
        "id_panne": key,
        "id_wsoucont": int_col(record, "IDWSOUCONT"),
        "ascenseur": text_col(record, "ASCENSEUR", 50),
        "adresse": text_col(record, "ADRES", 200),
        "code_postal": text_col(record, "NUM", 10),
        "date_appel": text_col(record, "DATEAPP", 20),
        "heure_appel": text_col(record, "HEUREAPP", 20),
        "date_arrivee": text_col(record, "DATEARR", 20),
        "heure_arrivee": text_col(record, "HEUREARR", 20),
        "date_depart": text_col(record, "DATEDEP", 20),
        "heure_depart": text_col(record, "HEUREDEP", 20),
        "motif": text_col(record, "MOTIF", 500),
        "cause": text_col(record, "CAUSE", 500),
        "travaux": text_col(record, "TRAVAUX", 1000),
        "depanneur": text_col(record, "DEPANNEUR", 100),
        "duree": int_col(record, "DUREE"),
        "type_panne": text_col(record, "TYPEPANNE", 100),
        "etat": text_col(record, "ETAT", 50),
        "demandeur": text_col(record, "DEMANDEUR", 100),
        "personnes_bloquees": text_col(record, "PERSBLOQ", 10),
        "data_wpanne": raw_json(record),
        "updated_at": now,
    });
    Some(MappedRow {
        key: Some(key),
        row,
    })
}

/// Quote record (step 5), upserted by `id_devis`. Monetary amounts come in
/// with the source locale's decimal comma.
pub fn quote_row(record: &RawRecord, now: &str) -> Option<MappedRow> {
    let key = normalize::positive_key(record, "IDWDEVIS")?;
    let row = json!({
        "id_devis": key,
        "id_wsoucont": int_col(record, "IDWSOUCONT"),
        "numero": text_col(record, "DEVIS", 50),
        "date_devis": text_col(record, "DATEDEVIS", 20),
        "client": text_col(record, "CLIENT", 200),
        "objet": text_col(record, "OBJET", 500),
        "montant_ht": decimal_col(record, "MONTANTHT"),
        "montant_ttc": decimal_col(record, "MONTANTTTC"),
        "etat": text_col(record, "ETAT", 50),
        "data_wdevis": raw_json(record),
        "updated_at": now,
    });
    Some(MappedRow {
        key: Some(key),
        row,
    })
}
