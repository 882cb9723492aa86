//! Letter composer: employee record + request in, PDF bytes out

pub mod assets;
pub mod metrics;
pub mod pdf;

pub use assets::{ImageAsset, ImageData, LetterAssets};

use crate::config::{find_hospital, CompanyInfo, Hospital, LiaisonConfig};
use crate::error::{LiaisonError, Result};
use crate::paths;
use liaison_types::{format_admission_fr, EmployeeRecord, LetterRequest};
use metrics::{text_width, wrap_text, Font};
use pdf::{PageContent, PdfBuilder, LOGO_XOBJECT, MM, PAGE_HEIGHT, PAGE_WIDTH, STAMP_XOBJECT};
use std::path::{Path, PathBuf};

const MARGIN_MM: f32 = 20.0;
const LOGO_BOX_MM: f32 = 40.0;
const STAMP_BOX_MM: f32 = 40.0;
const STAMP_BOTTOM_MM: f32 = 20.0;
const HOSPITAL_SIGNATURE_MM: f32 = 50.0;
/// Body text must stay above this line so it never overlaps the stamp
const FOOTER_TOP_MM: f32 = 62.0;
const BODY_TOP_MM: f32 = 105.0;
const LINE_STEP_MM: f32 = 6.5;
const SIGNATURE_GAP_MM: f32 = 12.0;
const SIGNATURE_STEP_MM: f32 = 10.0;

const BODY_SIZE: f32 = 10.0;
const TITLE_SIZE: f32 = 16.0;
const SUBTITLE_SIZE: f32 = 12.0;

pub const MAX_PAGES: usize = 2;

/// Baseline y (PDF user space) for a distance measured from the top edge
fn from_top(mm: f32) -> f32 {
    PAGE_HEIGHT - mm * MM
}

fn text_area_width() -> f32 {
    PAGE_WIDTH - 2.0 * MARGIN_MM * MM
}

/// A generated letter, not yet written anywhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub page_count: usize,
    /// `lettre_liaison_<id>_<yyyymmdd>.pdf`
    pub file_name: String,
    /// `LL-<id>-<yyyymmdd>`
    pub reference: String,
}

impl RenderedDocument {
    /// Write the PDF under `dir` with its conventional file name
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(&self.file_name);
        std::fs::create_dir_all(dir)
            .and_then(|_| std::fs::write(&path, &self.bytes))
            .map_err(|e| {
                LiaisonError::Persistence(format!("Failed to write {}: {}", path.display(), e))
            })?;
        log::info!("Wrote letter {} ({} bytes)", path.display(), self.bytes.len());
        Ok(path)
    }
}

/// Running text cursor that moves to a new page when it reaches the footer
struct BodyFlow {
    finished: Vec<PageContent>,
    page: PageContent,
    y: f32,
}

impl BodyFlow {
    fn new(first_page: PageContent) -> Self {
        Self {
            finished: Vec::new(),
            page: first_page,
            y: from_top(BODY_TOP_MM),
        }
    }

    fn ensure_room(&mut self) {
        if self.y < FOOTER_TOP_MM * MM {
            let full = std::mem::take(&mut self.page);
            self.finished.push(full);
            self.y = from_top(MARGIN_MM) - BODY_SIZE;
        }
    }

    fn line(&mut self, font: Font, text: &str, step_mm: f32) {
        self.ensure_room();
        self.page.text(font, BODY_SIZE, MARGIN_MM * MM, self.y, text);
        self.y -= step_mm * MM;
    }

    fn wrapped(&mut self, text: &str) {
        for line in wrap_text(text, Font::Regular, BODY_SIZE, text_area_width()) {
            self.line(Font::Regular, &line, LINE_STEP_MM);
        }
    }

    fn skip(&mut self, mm: f32) {
        self.y -= mm * MM;
    }

    fn page_count(&self) -> usize {
        self.finished.len() + 1
    }
}

pub struct LetterComposer {
    assets: LetterAssets,
    company: CompanyInfo,
    hospitals: Vec<Hospital>,
    nationality: String,
}

impl LetterComposer {
    pub fn new(assets: LetterAssets, config: &LiaisonConfig) -> Self {
        Self {
            assets,
            company: config.company.clone(),
            hospitals: config.hospitals.clone(),
            nationality: config.letter.nationality.clone(),
        }
    }

    /// Load the logo and stamp named in the config. Missing assets are fatal.
    pub fn from_config(config: &LiaisonConfig) -> Result<Self> {
        let assets = LetterAssets::load(&config.assets.logo, &config.assets.stamp)?;
        Ok(Self::new(assets, config))
    }

    fn validate(&self, record: &EmployeeRecord, request: &LetterRequest) -> Result<()> {
        let mut missing = request.missing_fields();
        if record.full_name().trim().is_empty() {
            missing.push("employee name");
        }
        if !missing.is_empty() {
            return Err(LiaisonError::Template(format!(
                "Missing required letter field(s): {}",
                missing.join(", ")
            )));
        }

        if record.id != request.employee_id.trim() {
            return Err(LiaisonError::Template(format!(
                "Request is for employee {} but record {} was given",
                request.employee_id.trim(),
                record.id
            )));
        }
        Ok(())
    }

    /// Lay out and serialize the letter. Identical inputs give identical bytes.
    pub fn compose(&self, record: &EmployeeRecord, request: &LetterRequest) -> Result<RenderedDocument> {
        self.validate(record, request)?;

        let hospital = request.hospital_name.trim();
        let address = request
            .hospital_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .or_else(|| find_hospital(&self.hospitals, hospital).map(|h| h.address.as_str()))
            .unwrap_or("");
        let company = self.company.name.trim();

        let mut flow = BodyFlow::new(self.header(request));

        let lines = [
            format!(
                "La société {} demande au {} l\u{2019}admission d\u{2019}un patient affilié {} :",
                company, hospital, company
            ),
            format!("Lieu d'admission : {}", hospital),
            format!("Adresse : {}", address),
            format!("Matricule : {}", record.id),
            format!("Nom du patient : {}", record.full_name()),
            format!("Nationalité : {}", self.nationality),
            format!("Numéro CIN : {}", record.cin),
            format!("CNSS : {}", record.cnss),
            format!("Médecin requérant : {}", request.requesting_physician.trim()),
            format!("Médecin(s) traitant(s) : {}", request.treating_physicians.trim()),
            format!(
                "Date d'admission : {}",
                format_admission_fr(request.issue_date, request.admission_time)
            ),
            format!("Type de prise en charge : {}", request.care_type.trim()),
        ];
        for line in &lines {
            flow.wrapped(line);
        }

        flow.skip(LINE_STEP_MM);
        flow.wrapped(&format!(
            "Prise en charge Totale par {} : La facture du {} est à régler totalement par {}.",
            company, hospital, company
        ));

        flow.skip(SIGNATURE_GAP_MM);
        flow.line(Font::Bold, "Signature et cachet", SIGNATURE_STEP_MM);
        flow.line(Font::Bold, company, SIGNATURE_STEP_MM);

        let page_count = flow.page_count();
        if page_count > MAX_PAGES {
            return Err(LiaisonError::Template(format!(
                "Letter needs {} pages, at most {} allowed; shorten the free-text fields",
                page_count, MAX_PAGES
            )));
        }

        let BodyFlow {
            finished,
            page: mut last_page,
            ..
        } = flow;
        self.footer(&mut last_page, hospital);

        let mut builder = PdfBuilder::new(&self.assets)?;
        for page in finished {
            builder.add_page(page)?;
        }
        builder.add_page(last_page)?;
        let bytes = builder.finish()?;

        log::debug!(
            "Composed letter for {} at {}: {} page(s), {} bytes",
            record.id,
            hospital,
            page_count,
            bytes.len()
        );

        Ok(RenderedDocument {
            bytes,
            page_count,
            file_name: paths::letter_file_name(&record.id, request.issue_date),
            reference: request.reference(),
        })
    }

    /// Logo, company block, titles and date on the first page
    fn header(&self, request: &LetterRequest) -> PageContent {
        let mut page = PageContent::new();
        let margin = MARGIN_MM * MM;

        let (logo_w, logo_h) = self.assets.logo.fit_within(LOGO_BOX_MM * MM, LOGO_BOX_MM * MM);
        page.image(
            LOGO_XOBJECT,
            PAGE_WIDTH - margin - logo_w,
            from_top(MARGIN_MM) - logo_h,
            logo_w,
            logo_h,
        );

        page.text(
            Font::Bold,
            BODY_SIZE,
            margin,
            from_top(40.0),
            &format!("Nom de l'entreprise : {}", self.company.name.trim()),
        );
        let details = [
            (45.0, "Adresse", &self.company.address),
            (50.0, "Téléphone", &self.company.phone),
            (55.0, "Fax", &self.company.fax),
        ];
        for (top, label, value) in details {
            if !value.trim().is_empty() {
                let text = format!("{} : {}", label, value.trim());
                page.text(Font::Regular, BODY_SIZE, margin, from_top(top), &text);
            }
        }

        page.line(margin, from_top(60.0), PAGE_WIDTH - margin, from_top(60.0), 0.5);

        for (top, size, title) in [
            (70.0, TITLE_SIZE, "LETTRE DE LIAISON"),
            (80.0, SUBTITLE_SIZE, "ADMISSION D\u{2019}UN PATIENT"),
        ] {
            let x = (PAGE_WIDTH - text_width(Font::Bold, title, size)) / 2.0;
            page.text(Font::Bold, size, x, from_top(top), title);
        }

        let date = format!("Date : {}", request.issue_date.format("%d/%m/%Y"));
        page.text(Font::Regular, BODY_SIZE, margin, from_top(95.0), &date);
        page
    }

    /// Stamp bottom-left and the hospital name right-aligned, on the last page
    fn footer(&self, page: &mut PageContent, hospital: &str) {
        let margin = MARGIN_MM * MM;
        let (stamp_w, stamp_h) = self
            .assets
            .stamp
            .fit_within(STAMP_BOX_MM * MM, STAMP_BOX_MM * MM);
        page.image(STAMP_XOBJECT, margin, STAMP_BOTTOM_MM * MM, stamp_w, stamp_h);

        let x = PAGE_WIDTH - margin - text_width(Font::Bold, hospital, BODY_SIZE);
        page.text(Font::Bold, BODY_SIZE, x, HOSPITAL_SIGNATURE_MM * MM, hospital);
    }
}

#[cfg(test)]
mod tests {
    use super::assets::test_support::solid_png;
    use super::*;
    use chrono::NaiveDate;
    use lopdf::content::Content;
    use lopdf::{Document, Object};

    fn config() -> LiaisonConfig {
        LiaisonConfig::from_json_str(
            r#"{
                "employees": { "path": "lll.CSV" },
                "assets": { "logo": "logo.png", "stamp": "cachet.png" },
                "company": {
                    "name": "CF MAIER ITAP",
                    "address": "Z.I El Mazraa, 8024 Tazarka",
                    "phone": "72 000 000"
                },
                "hospitals": [{ "name": "CH Metz", "address": "1 allée du Château, 57000 Metz" }]
            }"#,
        )
        .unwrap()
    }

    fn composer() -> LetterComposer {
        let assets = LetterAssets {
            logo: ImageAsset::from_bytes(&solid_png(20, 10, [0, 90, 170, 255])).unwrap(),
            stamp: ImageAsset::from_bytes(&solid_png(12, 12, [10, 10, 200, 160])).unwrap(),
        };
        LetterComposer::new(assets, &config())
    }

    fn jean_dupont() -> EmployeeRecord {
        EmployeeRecord {
            id: "1042".to_string(),
            last_name: "Dupont".to_string(),
            first_name: "Jean".to_string(),
            cin: "01234567".to_string(),
            cnss: "12345607".to_string(),
        }
    }

    fn request() -> LetterRequest {
        LetterRequest::new(
            "1042",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            "CH Metz",
            "Consultation médicale",
        )
    }

    /// Decoded text of every Tj on every page, in page order
    fn text_runs(bytes: &[u8]) -> Vec<String> {
        let mut doc = Document::load_mem(bytes).unwrap();
        doc.decompress();
        let mut runs = Vec::new();
        for (_, page_id) in doc.get_pages() {
            let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
            for op in content.operations.iter().filter(|op| op.operator == "Tj") {
                if let Some(Object::String(bytes, _)) = op.operands.first() {
                    runs.push(metrics::decode_win_ansi(bytes));
                }
            }
        }
        runs
    }

    #[test]
    fn test_compose_is_deterministic() {
        let composer = composer();
        let first = composer.compose(&jean_dupont(), &request()).unwrap();
        let second = composer.compose(&jean_dupont(), &request()).unwrap();
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.file_name, "lettre_liaison_1042_20240301.pdf");
        assert_eq!(first.reference, "LL-1042-20240301");
        assert_eq!(first.page_count, 1);
    }

    #[test]
    fn test_letter_carries_employee_and_hospital_fields() {
        let doc = composer().compose(&jean_dupont(), &request()).unwrap();
        let runs = text_runs(&doc.bytes);

        for expected in [
            "LETTRE DE LIAISON",
            "Date : 01/03/2024",
            "Matricule : 1042",
            "Nom du patient : Dupont Jean",
            "Numéro CIN : 01234567",
            "CNSS : 12345607",
            "Adresse : 1 allée du Château, 57000 Metz",
            "Date d'admission : 01/03/2024",
            "Signature et cachet",
            "CH Metz",
        ] {
            assert!(runs.iter().any(|r| r == expected), "missing {:?} in {:?}", expected, runs);
        }
        // Empty fax is left out of the header
        assert!(!runs.iter().any(|r| r.starts_with("Fax")));
    }

    #[test]
    fn test_request_address_overrides_catalogue() {
        let request = request().with_hospital_address("Service des urgences");
        let doc = composer().compose(&jean_dupont(), &request).unwrap();
        assert!(text_runs(&doc.bytes).contains(&"Adresse : Service des urgences".to_string()));
    }

    #[test]
    fn test_missing_fields_are_template_errors() {
        let mut request = request();
        request.hospital_name = "  ".to_string();
        request.care_type = String::new();
        let err = composer().compose(&jean_dupont(), &request).unwrap_err();
        match err {
            LiaisonError::Template(message) => {
                assert!(message.contains("hospital_name"));
                assert!(message.contains("care_type"));
            }
            other => panic!("expected template error, got {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_employee_rejected() {
        let mut request = request();
        request.employee_id = "2001".to_string();
        let err = composer().compose(&jean_dupont(), &request).unwrap_err();
        assert!(matches!(err, LiaisonError::Template(_)));
    }

    #[test]
    fn test_long_physician_list_flows_to_second_page() {
        let treating = (1..=40)
            .map(|i| format!("Dr Médecin{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let request = request().with_physicians("Dr Ben Ali", treating);
        let doc = composer().compose(&jean_dupont(), &request).unwrap();
        assert_eq!(doc.page_count, 2);
        assert_eq!(Document::load_mem(&doc.bytes).unwrap().get_pages().len(), 2);
    }

    #[test]
    fn test_more_than_two_pages_rejected() {
        let treating = (1..=400)
            .map(|i| format!("Dr Médecin{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let request = request().with_physicians("", treating);
        let err = composer().compose(&jean_dupont(), &request).unwrap_err();
        assert!(matches!(err, LiaisonError::Template(_)));
    }

    #[test]
    fn test_write_to_dir_uses_conventional_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let doc = composer().compose(&jean_dupont(), &request()).unwrap();
        let path = doc.write_to_dir(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("lettre_liaison_1042_20240301.pdf"));
        assert_eq!(std::fs::read(path).unwrap(), doc.bytes);
    }
}
