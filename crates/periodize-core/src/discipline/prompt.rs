//! Prompt templates for the generative-text service.

use std::fmt::Write;

use periodize_db::models::Discipline;

use super::athlete::{AthleteData, AthleteProfile, Benchmarks};

/// System prompt framing the model as a coach for the discipline.
pub fn system_prompt(discipline: Discipline) -> &'static str {
    match discipline {
        Discipline::General => {
            "You are an expert CrossFit coach and programming specialist. Produce detailed, \
             personalised periodization plans based on the athlete information provided."
        }
        Discipline::Strength => {
            "You are an expert strength and hypertrophy coach. Produce detailed, personalised \
             training plans based on the athlete information provided."
        }
        Discipline::Running => {
            "You are an expert running and endurance coach. Produce detailed, evidence-based, \
             personalised plans grounded in exercise physiology and proven running methodology."
        }
        Discipline::Cycling => {
            "You are an expert cycling and endurance coach. Produce detailed, evidence-based, \
             personalised plans grounded in exercise physiology and proven cycling methodology."
        }
    }
}

/// Build the user prompt asking for a `weeks`-long plan for `athlete`.
pub fn build_prompt(athlete: &AthleteData, weeks: i32) -> String {
    let mut out = String::new();
    match athlete {
        AthleteData::General(a) => {
            out.push_str(
                "You are a CrossFit programming expert. Write a detailed periodization for an \
                 athlete with the following profile:\n\n",
            );
            push_profile(&mut out, &a.profile);
            line(&mut out, "Weekly availability", Some(&format!("{} days", a.availability_days)));
            line(&mut out, "Detailed goal", a.detailed_goal.as_deref());
            line(&mut out, "Injuries or limitations", a.injuries.as_deref());
            line(&mut out, "Training history", a.history.as_deref());
            if a.primary_training {
                out.push_str("This will be the athlete's main training.\n");
            } else {
                out.push_str("This is secondary training, complementing classes at the box.\n");
            }
            line(&mut out, "Always trains during", a.training_period.as_deref());
            out.push('\n');
            push_benchmarks(&mut out, a.benchmarks.as_ref());
            let _ = write!(
                out,
                "\nCreate a {weeks}-week periodization split into phases aimed at the athlete's goal.\n\n\
                 For each week include:\n\
                 1. Weekly objectives\n\
                 2. Workout details for each day\n\
                 3. Intensity of each session (low, medium, high)\n\
                 4. Specific exercises with sets, reps and loads (as % of 1RM)\n\
                 5. Specific WODs\n\
                 6. Recovery recommendations\n"
            );
        }
        AthleteData::Strength(a) => {
            out.push_str(
                "You are a strength training expert. Write a detailed training plan for an \
                 athlete with the following profile:\n\n",
            );
            push_profile(&mut out, &a.profile);
            line(&mut out, "Weekly availability", Some(&format!("{} days", a.availability_days)));
            line(&mut out, "Training focus", Some(&a.training_focus));
            line(&mut out, "Sessions per week", Some(&a.sessions_per_week.to_string()));
            line(&mut out, "Session duration", Some(&format!("{} minutes", a.session_minutes)));
            line(&mut out, "Available equipment", a.equipment_available.as_deref());
            line(&mut out, "Detailed goal", a.detailed_goal.as_deref());
            line(&mut out, "Injuries or limitations", a.injuries.as_deref());
            line(&mut out, "Training history", a.history.as_deref());
            line(&mut out, "Always trains during", a.training_period.as_deref());
            let _ = write!(
                out,
                "\nCreate a {weeks}-week periodization split into phases aimed at the athlete's goal.\n\n\
                 For each week include:\n\
                 1. Weekly objectives\n\
                 2. Workout details for each day\n\
                 3. Muscle group split\n\
                 4. Specific exercises with sets, reps and recommended loads\n\
                 5. Rest between sets\n\
                 6. Advanced techniques where appropriate\n\
                 7. Recovery recommendations\n"
            );
        }
        AthleteData::Running(a) => {
            out.push_str(
                "You are a running and endurance expert. Write a detailed, progressive plan for a \
                 runner with the following profile:\n\n",
            );
            push_profile(&mut out, &a.profile);
            line(&mut out, "Days available per week", Some(&a.available_days.to_string()));
            line(&mut out, "Current weekly volume", Some(&format!("{} km", a.weekly_km)));
            line(&mut out, "Current 5k pace", a.pace_5k.as_deref());
            line(&mut out, "Current 10k pace", a.pace_10k.as_deref());
            line(&mut out, "Best 5k", a.best_5k.as_deref());
            line(&mut out, "Best 10k", a.best_10k.as_deref());
            line(&mut out, "Best half marathon", a.best_21k.as_deref());
            line(&mut out, "Best marathon", a.best_42k.as_deref());
            line(&mut out, "Target time", a.target_time.as_deref());
            line(&mut out, "Race date", a.race_date.as_deref());
            line(&mut out, "Injury history", a.injury_history.as_deref());
            line(&mut out, "Previous experience", a.prior_experience.as_deref());
            line(&mut out, "Preferred time", a.training_preference.as_deref());
            line(&mut out, "Training location", a.training_location.as_deref());
            line(&mut out, "Equipment", a.equipment.as_deref());
            let _ = write!(
                out,
                "\nCreate a {weeks}-week periodization following running training principles:\n\
                 - aerobic base phase first, intensification in the final weeks\n\
                 - a recovery week every 3-4 weeks\n\
                 - easy runs, long runs, tempo runs, intervals and strides\n\
                 - for every session: duration or distance, target pace or heart-rate zone, \
                 warm-up and cool-down\n\
                 - never increase weekly volume by more than 10%\n"
            );
        }
        AthleteData::Cycling(a) => {
            out.push_str(
                "You are a cycling and endurance expert. Write a detailed, progressive plan for a \
                 cyclist with the following profile:\n\n",
            );
            push_profile(&mut out, &a.profile);
            line(&mut out, "Days available per week", Some(&a.available_days.to_string()));
            line(&mut out, "Current weekly volume", Some(&format!("{} hours", a.weekly_hours)));
            line(&mut out, "Bike type", a.bike_type.as_deref());
            line(&mut out, "FTP", a.ftp_watts.map(|w| format!("{w} W")).as_deref());
            line(
                &mut out,
                "Average power",
                a.avg_power_watts.map(|w| format!("{w} W")).as_deref(),
            );
            line(&mut out, "Best 40 km", a.best_40k.as_deref());
            line(&mut out, "Best 100 km", a.best_100k.as_deref());
            line(&mut out, "Best 160 km", a.best_160k.as_deref());
            line(&mut out, "Target time", a.target_time.as_deref());
            line(&mut out, "Race date", a.race_date.as_deref());
            line(&mut out, "Injury history", a.injury_history.as_deref());
            line(&mut out, "Previous experience", a.prior_experience.as_deref());
            line(&mut out, "Preference", a.training_preference.as_deref());
            line(&mut out, "Equipment", a.equipment.as_deref());
            line(&mut out, "Preferred training zone", a.preferred_zone.as_deref());
            let _ = write!(
                out,
                "\nInstructions:\n\
                 1. Create a progressive {weeks}-week plan\n\
                 2. Respect the athlete's experience level and current volume\n\
                 3. Include aerobic base, intervals, strength and recovery rides\n\
                 4. Use FTP-based training zones when FTP is known\n\
                 5. Adapt sessions to the bike type and goals\n\
                 6. Include nutrition and hydration guidance\n\
                 7. Schedule adequate recovery\n\
                 8. Offer indoor alternatives for bad-weather days\n"
            );
        }
    }
    out.push_str(
        "\nFormat the answer as a detailed week-by-week programme with everything the athlete \
         needs to follow it.\n",
    );
    out
}

fn push_profile(out: &mut String, p: &AthleteProfile) {
    let _ = writeln!(out, "Name: {}", p.name);
    let _ = writeln!(out, "Age: {} years", p.age);
    let _ = writeln!(out, "Weight: {} kg", p.weight_kg);
    let _ = writeln!(out, "Height: {} cm", p.height_cm);
    let _ = writeln!(out, "Experience level: {}", p.experience);
    let _ = writeln!(out, "Main goal: {}", p.goal);
}

/// Append `label: value` when the value is present and not blank.
fn line(out: &mut String, label: &str, value: Option<&str>) {
    if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
        let _ = writeln!(out, "{label}: {v}");
    }
}

fn push_benchmarks(out: &mut String, benchmarks: Option<&Benchmarks>) {
    let Some(b) = benchmarks else {
        out.push_str("No benchmark data available.\n");
        return;
    };
    let mut items = Vec::new();
    for (label, value) in [
        ("Back Squat 1RM", b.back_squat),
        ("Deadlift 1RM", b.deadlift),
        ("Clean 1RM", b.clean),
        ("Snatch 1RM", b.snatch),
    ] {
        if let Some(kg) = value {
            items.push(format!("{label}: {kg} kg"));
        }
    }
    if let Some(fran) = &b.fran {
        items.push(format!("Fran: {fran}"));
    }
    if let Some(grace) = &b.grace {
        items.push(format!("Grace: {grace}"));
    }
    if items.is_empty() {
        out.push_str("No benchmark data available.\n");
    } else {
        out.push_str("Benchmarks:\n");
        for item in items {
            let _ = writeln!(out, "{item}");
        }
    }
}
