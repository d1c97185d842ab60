//! Translation of vendor criteria results into report flag records.
//!
//! Each flag is declared once as `(field, codes, combinator)`. A code result of
//! `P` or `F` yields `false` or `true`; any other marker (`*` unevaluated, `N`
//! not applicable, `--` unavailable, or a missing criterion) yields `None`.
//! Composite flags fail when any code fails, are `None` only when every code
//! is `None`, and are `false` otherwise.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

use crate::domain::report::{CreditReportData, CriminalReportData, ReportData, ReportKind};
use crate::vendor::VendorResponse;

const REQUIRED_SSN_PATTERN: &str = r"^.*SS# REQUIRED TO ACCESS CONSUMERS FILE.*$";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Combinator {
    /// The lone code's own result.
    Single,
    /// Failure of any code; unknown only when nothing is known.
    AnyFailing,
}

pub struct FlagRule<T> {
    pub field: &'static str,
    pub codes: &'static [&'static str],
    pub combinator: Combinator,
    apply: fn(&mut T, Option<bool>),
}

impl<T> FlagRule<T> {
    pub fn evaluate(&self, response: &VendorResponse, applicant_id: Option<&str>) -> Option<bool> {
        let results: Vec<Option<bool>> =
            self.codes.iter().map(|code| has_failing_code(response, applicant_id, code)).collect();
        match self.combinator {
            Combinator::Single => results.first().copied().flatten(),
            Combinator::AnyFailing => has_failing_codes(&results),
        }
    }
}

macro_rules! flag {
    ($field:literal, [$($code:literal),+], $combinator:ident, $slot:ident) => {
        FlagRule {
            field: $field,
            codes: &[$($code),+],
            combinator: Combinator::$combinator,
            apply: |data: &mut Record, value: Option<bool>| data.$slot = value,
        }
    };
}

pub fn credit_rules() -> Vec<FlagRule<CreditReportData>> {
    type Record = CreditReportData;
    let rules: [FlagRule<Record>; 14] = [
        flag!("hasNoEstablishedCredit", ["CR100"], Single, has_no_established_credit),
        flag!("hasBankruptcy", ["CR101"], Single, has_bankruptcy),
        flag!("hasForeclosure", ["CR102"], Single, has_foreclosure),
        flag!("hasLegalItems", ["CR104", "CR107"], AnyFailing, has_legal_items),
        flag!("hasTaxLiens", ["CR105"], Single, has_tax_liens),
        flag!("hasMortgageDebt", ["CR115"], Single, has_mortgage_debt),
        flag!("hasPropertyRentalDebt", ["CR116"], Single, has_property_rental_debt),
        flag!("hasUtilityDebt", ["CR117"], Single, has_utility_debt),
        flag!("hasRentalCollections", ["CR103", "CO806"], AnyFailing, has_rental_collections),
        flag!("hasNsfOrLatePayMin", ["SW849"], Single, has_nsf_or_late_pay_min),
        flag!("hasNsfOrLatePayMax", ["SW850"], Single, has_nsf_or_late_pay_max),
        flag!("hasEvictionNotice", ["SW851"], Single, has_eviction_notice),
        flag!("hasLeaseViolation", ["SW853"], Single, has_lease_violation),
        flag!(
            "hasSuspiciousSsn",
            ["SN900", "SN901", "SN903", "SN904", "SN905", "SN906"],
            AnyFailing,
            has_suspicious_ssn
        ),
    ];
    rules.into()
}

pub fn criminal_rules() -> Vec<FlagRule<CriminalReportData>> {
    type Record = CriminalReportData;
    let rules: [FlagRule<Record>; 28] = [
        flag!("hasDrugsFelony", ["CM321"], Single, has_drugs_felony),
        flag!("hasDrugsMisdemeanor", ["CM322"], Single, has_drugs_misdemeanor),
        flag!("hasDuiFelony", ["CM323"], Single, has_dui_felony),
        flag!("hasDuiMisdemeanor", ["CM324"], Single, has_dui_misdemeanor),
        flag!("hasUnclassifiedFelony", ["CM325"], Single, has_unclassified_felony),
        flag!("hasUnclassifiedMisdemeanor", ["CM326"], Single, has_unclassified_misdemeanor),
        flag!("hasPropertyFelony", ["CM327"], Single, has_property_felony),
        flag!("hasPropertyMisdemeanor", ["CM328"], Single, has_property_misdemeanor),
        flag!("hasSexFelony", ["CM329"], Single, has_sex_felony),
        flag!("hasSexMisdemeanor", ["CM330"], Single, has_sex_misdemeanor),
        flag!("hasTheftFelony", ["CM331"], Single, has_theft_felony),
        flag!("hasTheftMisdemeanor", ["CM332"], Single, has_theft_misdemeanor),
        flag!("hasTheftByCheckFelony", ["CM333"], Single, has_theft_by_check_felony),
        flag!("hasTheftByCheckMisdemeanor", ["CM334"], Single, has_theft_by_check_misdemeanor),
        flag!("hasTrafficFelony", ["CM335"], Single, has_traffic_felony),
        flag!("hasTrafficMisdemeanor", ["CM336"], Single, has_traffic_misdemeanor),
        flag!("hasViolentCrimeFelony", ["CM337"], Single, has_violent_crime_felony),
        flag!("hasViolentCrimeMisdemeanor", ["CM338"], Single, has_violent_crime_misdemeanor),
        flag!("hasWeaponsFelony", ["CM339"], Single, has_weapons_felony),
        flag!("hasWeaponsMisdemeanor", ["CM340"], Single, has_weapons_misdemeanor),
        flag!("hasRegisteredSexOffender", ["SX500"], Single, has_registered_sex_offender),
        flag!(
            "hasRegisteredSexOffenderDobOnly",
            ["SX501"],
            Single,
            has_registered_sex_offender_dob_only
        ),
        flag!("hasGlobalSanctions", ["CM305"], Single, has_global_sanctions),
        flag!("hasGlobalSanctionsFuzzy", ["CM306"], Single, has_global_sanctions_fuzzy),
        flag!("hasEvictionRecordsMin", ["EV700"], Single, has_eviction_records_min),
        flag!("hasEvictionRecordsMax", ["EV701"], Single, has_eviction_records_max),
        flag!("hasEvictionFilingsMin", ["EV702", "SW852"], AnyFailing, has_eviction_filings_min),
        flag!("hasEvictionFilingsMax", ["EV703"], Single, has_eviction_filings_max),
    ];
    rules.into()
}

pub fn build_report_data(
    kind: ReportKind,
    response: &VendorResponse,
    applicant_id: Option<&str>,
) -> ReportData {
    match kind {
        ReportKind::Credit => ReportData::Credit(build_credit_report(response, applicant_id)),
        ReportKind::Criminal => ReportData::Criminal(build_criminal_report(response, applicant_id)),
    }
}

pub fn build_credit_report(response: &VendorResponse, applicant_id: Option<&str>) -> CreditReportData {
    let mut report = apply_rules(credit_rules(), response, applicant_id);
    report.credit_score = credit_score(response, applicant_id);
    report.has_required_ssn_response = has_required_ssn_response(response, applicant_id);
    report
}

pub fn build_criminal_report(
    response: &VendorResponse,
    applicant_id: Option<&str>,
) -> CriminalReportData {
    apply_rules(criminal_rules(), response, applicant_id)
}

fn apply_rules<T: Default>(
    rules: Vec<FlagRule<T>>,
    response: &VendorResponse,
    applicant_id: Option<&str>,
) -> T {
    let mut report = T::default();
    for rule in &rules {
        (rule.apply)(&mut report, rule.evaluate(response, applicant_id));
    }
    report
}

/// Result of one criterion for the given applicant, or for the first applicant
/// listed when no id is given.
pub fn has_failing_code(
    response: &VendorResponse,
    applicant_id: Option<&str>,
    code: &str,
) -> Option<bool> {
    let criterion = response.criterion(code)?;
    let result = match applicant_id {
        Some(id) => criterion.applicant_results.iter().find(|result| result.applicant_id == id),
        None => criterion.applicant_results.first(),
    }
    .map(|result| result.result.to_ascii_uppercase())
        .unwrap_or_default();

    if result.contains('P') || result.contains('F') {
        Some(result.contains('F'))
    } else {
        None
    }
}

pub fn has_failing_codes(results: &[Option<bool>]) -> Option<bool> {
    if results.iter().all(Option::is_none) {
        return None;
    }
    Some(results.iter().any(|result| *result == Some(true)))
}

/// Leading integer of the vendor score text; no digits means no score.
pub fn credit_score(response: &VendorResponse, applicant_id: Option<&str>) -> Option<i32> {
    let applicant = match applicant_id {
        Some(id) => response.rent_to_incomes.iter().find(|entry| entry.applicant_id == id),
        None => response.rent_to_incomes.first(),
    }?;
    let raw = applicant.credit_score.as_deref()?.trim();

    let (sign, digits) = match raw.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let leading: String = digits.chars().take_while(char::is_ascii_digit).collect();
    leading.parse::<i32>().ok().map(|score| sign * score)
}

pub fn has_required_ssn_response(
    response: &VendorResponse,
    applicant_id: Option<&str>,
) -> Option<bool> {
    let blocked = response.blocked_text()?;
    let requires_ssn = required_ssn_regex().map(|regex| regex.is_match(blocked)).unwrap_or(false);
    if !requires_ssn {
        return Some(false);
    }

    let Some(applicant_id) = applicant_id else {
        return Some(true);
    };
    let pattern = format!(r"^.*applicant\s+\({}\).*$", regex::escape(applicant_id));
    let names_applicant = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .map(|regex| regex.is_match(blocked))
        .unwrap_or(false);
    Some(names_applicant)
}

fn required_ssn_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| {
            RegexBuilder::new(REQUIRED_SSN_PATTERN)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .ok()
        })
        .as_ref()
}
