//! The one place UI locators live.
//!
//! Entries are templates: `{package}` and `{reel_id_prefix}` are interpolated
//! when a catalog is built for a clone, call-time placeholders such as
//! `{username}` are filled through [`XpathCatalog::render`]. A retargeted clone
//! only needs new templates here or `catalog_overrides` in the YAML config.

use std::collections::HashMap;

use crate::app::config::PopupRule;
use crate::app::error::AppError;
use crate::app::ui::xpath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Loc {
    // home / navigation
    HomeFeed,
    CreateButton,
    ExploreTab,
    StoryIndicator,
    // creation flow
    ReelTab,
    NewReelIndicator,
    GalleryVideoContainer,
    // audio
    AddAudioButton,
    TrendingTab,
    DragHandle,
    DragHandleAlt,
    TrackRow,
    SelectSoundButton,
    AudioScrubber,
    DoneButton,
    NextButton,
    // caption / share
    CaptionInput,
    CaptionInputAlt,
    ShareButton,
    // post verification
    ReelCaption,
    InsightsPill,
    ProfileAvatar,
    // login
    AlreadyHaveAccount,
    LoginUsernameField,
    LoginPasswordField,
    LoginButton,
    IncorrectPassword,
    DialogOk,
    SaveLoginPrompt,
    SaveButton,
    SaveButtonPl,
    NotNowButton,
    NotNowButtonPl,
    NotificationsPrompt,
    TwoFactorPrompt,
    CodeInput,
    CheckYourEmail,
    ContinueButton,
    SetupNewDevicePrompt,
    SkipButton,
    AccountSuspended,
    SomethingWentWrong,
    PhotoRemoved,
    // explore / warmup
    ExploreSearchBar,
    SearchInput,
    SearchReelsTab,
    ReelThumbnail,
    ReelViewer,
    LikeButton,
    LikedButton,
    CommentButton,
    CommentSheet,
    CommentInput,
    PostCommentButton,
    // button by visible label, for the smart clicker fallback
    ButtonWithText,
    // system surfaces
    PermissionAllow,
    NotificationIdentity,
    IdentityConfirm,
    // VPN app (catalog built for the VPN package)
    VpnIpLabel,
    VpnReconnect,
    VpnConnected,
}

const ENTRIES: &[(Loc, &str, &str)] = &[
    (Loc::HomeFeed, "home_feed", "//*[@resource-id='{package}:id/feed_tab' or @content-desc='Home']"),
    (Loc::CreateButton, "create_button", "//*[@resource-id='{package}:id/creation_tab' or @content-desc='Create' or @content-desc='New post']"),
    (Loc::ExploreTab, "explore_tab", "//*[@resource-id='{package}:id/search_tab' or @content-desc='Search and explore']"),
    (Loc::StoryIndicator, "story_indicator", "//*[contains(@text, 'Your story') or contains(@content-desc, 'Your story')]"),
    (Loc::ReelTab, "reel_tab", "//*[@resource-id='{package}:id/cam_dest_clips' or @text='REEL' or @content-desc='REEL']"),
    (Loc::NewReelIndicator, "new_reel_indicator", "//*[@text='New reel' or @content-desc='New reel']"),
    (Loc::GalleryVideoContainer, "gallery_video_container", "//*[@resource-id='{package}:id/gallery_recycler_view']/*[starts-with(@content-desc, 'Video thumbnail') or .//*[starts-with(@content-desc, 'Video thumbnail')]]"),
    (Loc::AddAudioButton, "add_audio_button", "//*[@text='Add audio' or @content-desc='Add audio']"),
    (Loc::TrendingTab, "trending_tab", "//*[@text='Trending' or @content-desc='Trending']"),
    (Loc::DragHandle, "drag_handle", "//*[@resource-id='{package}:id/bottom_sheet_drag_handle_prism']"),
    (Loc::DragHandleAlt, "drag_handle_alt", "//*[@resource-id='{package}:id/bottom_sheet_drag_handle']"),
    (Loc::TrackRow, "track_row", "//*[@resource-id='{package}:id/track_container']"),
    (Loc::SelectSoundButton, "select_sound_button", "//*[@text='Select Sound' or @text='Select sound' or @content-desc='Select sound']"),
    (Loc::AudioScrubber, "audio_scrubber", "//*[@resource-id='{package}:id/scrubber_recycler_view' or @resource-id='{package}:id/audio_scrubber']"),
    (Loc::DoneButton, "done_button", "//*[@text='Done' or @content-desc='Done']"),
    (Loc::NextButton, "next_button", "//*[@text='Next' or @content-desc='Next']"),
    (Loc::CaptionInput, "caption_input", "//*[@resource-id='{package}:id/caption_input_text_view']"),
    (Loc::CaptionInputAlt, "caption_input_alt", "//*[@resource-id='{package}:id/caption_text_view' or starts-with(@text, 'Write a caption')]"),
    (Loc::ShareButton, "share_button", "//*[@text='Share' or @content-desc='Share' or @text='Next' or @content-desc='Next']"),
    (Loc::ReelCaption, "reel_caption", "//*[contains(@text, '{caption}') or contains(@content-desc, '{caption}')]"),
    (Loc::InsightsPill, "insights_pill", "//*[contains(@text, 'View insights') or contains(@content-desc, 'View insights')]"),
    (Loc::ProfileAvatar, "profile_avatar", "//*[contains(@content-desc, '{username}') and contains(@content-desc, 'profile picture')]"),
    (Loc::AlreadyHaveAccount, "already_have_account", "//*[@text='I already have an account' or @text='Log into existing account' or @content-desc='I already have an account']"),
    (Loc::LoginUsernameField, "login_username_field", "//*[@resource-id='{package}:id/login_username'] | //android.widget.EditText[contains(@text, 'Username') or contains(@content-desc, 'Username')]"),
    (Loc::LoginPasswordField, "login_password_field", "//*[@resource-id='{package}:id/password'] | //android.widget.EditText[contains(@text, 'Password') or contains(@content-desc, 'Password') or @password='true']"),
    (Loc::LoginButton, "login_button", "//*[@text='Log in' or @content-desc='Log in']"),
    (Loc::IncorrectPassword, "incorrect_password", "//*[contains(@text, 'Incorrect Password') or contains(@text, 'incorrect password') or contains(@text, 'password you entered is incorrect') or contains(@content-desc, 'Incorrect Password')]"),
    (Loc::DialogOk, "dialog_ok", "//*[@text='OK' or @text='Ok' or @content-desc='OK']"),
    (Loc::SaveLoginPrompt, "save_login_prompt", "//*[contains(@text, 'Save your login info') or contains(@content-desc, 'Save your login info') or contains(@text, 'Zapisać dane logowania')]"),
    (Loc::SaveButton, "save_button", "//*[@text='Save' or @content-desc='Save']"),
    (Loc::SaveButtonPl, "save_button_pl", "//*[@text='Zapisz' or @content-desc='Zapisz']"),
    (Loc::NotNowButton, "not_now_button", "//*[@text='Not now' or @text='Not Now' or @content-desc='Not now']"),
    (Loc::NotNowButtonPl, "not_now_button_pl", "//*[@text='Nie teraz' or @content-desc='Nie teraz']"),
    (Loc::NotificationsPrompt, "notifications_prompt", "//*[contains(@text, 'Turn on notifications') or contains(@content-desc, 'Turn on notifications')]"),
    (Loc::TwoFactorPrompt, "two_factor_prompt", "//*[contains(@text, 'Enter confirmation code') or contains(@text, 'Enter the code') or contains(@text, 'two-factor') or contains(@content-desc, 'Enter confirmation code')]"),
    (Loc::CodeInput, "code_input", "//android.widget.EditText[contains(@text, 'Code') or contains(@content-desc, 'Code') or contains(@content-desc, 'code')] | //*[@resource-id='{package}:id/security_code']"),
    (Loc::CheckYourEmail, "check_your_email", "//*[contains(@text, 'Check your email') or contains(@content-desc, 'Check your email')]"),
    (Loc::ContinueButton, "continue_button", "//*[@text='Continue' or @content-desc='Continue']"),
    (Loc::SetupNewDevicePrompt, "setup_new_device_prompt", "//*[contains(@text, 'Set up on new device') or contains(@content-desc, 'Set up on new device')]"),
    (Loc::SkipButton, "skip_button", "//*[@text='Skip' or @content-desc='Skip']"),
    (Loc::AccountSuspended, "account_suspended", "//*[contains(@text, 'suspended your account') or contains(@text, 'account has been suspended') or contains(@content-desc, 'account has been suspended')]"),
    (Loc::SomethingWentWrong, "something_went_wrong", "//*[contains(@text, 'Something went wrong') or contains(@content-desc, 'Something went wrong')]"),
    (Loc::PhotoRemoved, "photo_removed", "//*[contains(@text, 'removed') and (contains(@text, 'photo') or contains(@text, 'video') or contains(@text, 'copyright'))]"),
    (Loc::ExploreSearchBar, "explore_search_bar", "//*[@resource-id='{package}:id/action_bar_search_edit_text'] | //*[@text='Search' or @content-desc='Search']"),
    (Loc::SearchInput, "search_input", "//*[@resource-id='{package}:id/action_bar_search_edit_text'] | //android.widget.EditText"),
    (Loc::SearchReelsTab, "search_reels_tab", "//*[@text='Reels' or @content-desc='Reels']"),
    (Loc::ReelThumbnail, "reel_thumbnail", "//*[starts-with(@resource-id, '{reel_id_prefix}') and (contains(@content-desc, 'Reel by') or starts-with(@resource-id, '{reel_id_prefix}image_button'))]"),
    (Loc::ReelViewer, "reel_viewer", "//*[@resource-id='{package}:id/clips_viewer_view_pager' or @resource-id='{package}:id/clips_video_container']"),
    (Loc::LikeButton, "like_button", "//*[(@resource-id='{package}:id/like_button' and @selected='false') or @content-desc='Like']"),
    (Loc::LikedButton, "liked_button", "//*[(@resource-id='{package}:id/like_button' and @selected='true') or @content-desc='Liked' or @content-desc='Unlike']"),
    (Loc::CommentButton, "comment_button", "//*[@resource-id='{package}:id/comment_button' or @content-desc='Comment']"),
    (Loc::CommentSheet, "comment_sheet", "//*[@resource-id='{package}:id/layout_comment_thread_edittext' or @text='Comments']"),
    (Loc::CommentInput, "comment_input", "//*[@resource-id='{package}:id/layout_comment_thread_edittext']"),
    (Loc::PostCommentButton, "post_comment_button", "//*[@resource-id='{package}:id/layout_comment_thread_post_button' or @text='Post' or @content-desc='Post']"),
    (Loc::ButtonWithText, "button_with_text", "//*[@text='{text}' or @content-desc='{text}']"),
    (Loc::PermissionAllow, "permission_allow", "//*[@resource-id='com.android.permissioncontroller:id/permission_allow_button' or @resource-id='com.android.permissioncontroller:id/permission_allow_foreground_only_button' or @resource-id='com.android.permissioncontroller:id/permission_allow_all_button']"),
    (Loc::NotificationIdentity, "notification_identity", "//*[contains(@text, 'Tap to quit the app and generate a new identity')]"),
    (Loc::IdentityConfirm, "identity_confirm", "//*[@text='OK' or @text='Yes' or @text='YES' or @text='Allow' or @text='ALLOW' or @text='Continue']"),
    (Loc::VpnIpLabel, "vpn_ip_label", "//*[@resource-id='{package}:id/ip_address' or @resource-id='{package}:id/tv_ip' or starts-with(@text, 'IP:')]"),
    (Loc::VpnReconnect, "vpn_reconnect", "//*[@resource-id='{package}:id/reconnect' or @text='Reconnect' or @text='Change IP' or @content-desc='Reconnect']"),
    (Loc::VpnConnected, "vpn_connected", "//*[@text='Connected' or @text='CONNECTED' or @content-desc='Connected']"),
];

impl Loc {
    pub fn name(self) -> &'static str {
        ENTRIES
            .iter()
            .find(|(loc, _, _)| *loc == self)
            .map(|(_, name, _)| *name)
            .unwrap_or("unknown")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ENTRIES
            .iter()
            .find(|(_, entry_name, _)| *entry_name == name)
            .map(|(loc, _, _)| *loc)
    }
}

/// Locators resolved for one app package; immutable once built.
#[derive(Debug, Clone)]
pub struct XpathCatalog {
    package: String,
    entries: HashMap<Loc, String>,
}

impl XpathCatalog {
    pub fn for_package(package: &str) -> Self {
        Self::base(package, &format!("{package}:id/"))
    }

    fn base(package: &str, reel_id_prefix: &str) -> Self {
        let entries = ENTRIES
            .iter()
            .map(|(loc, _, template)| (*loc, interpolate(template, package, reel_id_prefix)))
            .collect();
        Self {
            package: package.to_string(),
            entries,
        }
    }

    /// `reel_id_prefix` defaults to `<package>:id/`; some clones ship a mangled id namespace.
    pub fn build(
        package: &str,
        reel_id_prefix: Option<&str>,
        overrides: &HashMap<String, String>,
    ) -> Result<Self, AppError> {
        let default_prefix = format!("{package}:id/");
        let prefix = reel_id_prefix
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(&default_prefix);
        let mut catalog = Self::base(package, prefix);
        for (name, template) in overrides {
            let loc = Loc::from_name(name).ok_or_else(|| {
                AppError::config(format!("catalog_overrides: unknown locator '{name}'"), "")
            })?;
            let resolved = interpolate(template, package, prefix);
            let sample = resolved
                .replace("{username}", "sample")
                .replace("{caption}", "sample")
                .replace("{text}", "sample");
            xpath::compile(&sample).map_err(|err| {
                AppError::config(format!("catalog_overrides.{name} is invalid: {err}"), "")
            })?;
            catalog.entries.insert(loc, resolved);
        }
        Ok(catalog)
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn get(&self, loc: Loc) -> &str {
        self.entries.get(&loc).map(String::as_str).unwrap_or_default()
    }

    /// Fills call-time placeholders. Values are stripped of quote characters so
    /// they cannot terminate the surrounding XPath literal.
    pub fn render(&self, loc: Loc, params: &[(&str, &str)]) -> String {
        let mut out = self.get(loc).to_string();
        for (key, value) in params {
            let safe: String = value.chars().filter(|ch| *ch != '\'' && *ch != '"').collect();
            out = out.replace(&format!("{{{key}}}"), &safe);
        }
        out
    }

    pub fn profile_avatar(&self, username: &str) -> String {
        self.render(Loc::ProfileAvatar, &[("username", username)])
    }

    pub fn reel_caption(&self, caption_prefix: &str) -> String {
        self.render(Loc::ReelCaption, &[("caption", caption_prefix)])
    }

    pub fn button_with_text(&self, text: &str) -> String {
        self.render(Loc::ButtonWithText, &[("text", text)])
    }

    /// Popup rules armed when the YAML config has no `popups` section.
    pub fn default_popup_rules(&self) -> Vec<PopupRule> {
        let click = |name: &str, trigger: String, button: String| PopupRule {
            name: name.to_string(),
            text_xpath: trigger,
            button_xpath: Some(button),
            callback: None,
        };
        let callback = |name: &str, trigger: String, callback: &str| PopupRule {
            name: name.to_string(),
            text_xpath: trigger,
            button_xpath: None,
            callback: Some(callback.to_string()),
        };
        let allow = self.get(Loc::PermissionAllow).to_string();
        let not_now = self.get(Loc::NotNowButton).to_string();
        vec![
            callback("account_suspended", self.get(Loc::AccountSuspended).to_string(), "suspended_account"),
            callback("something_went_wrong", self.get(Loc::SomethingWentWrong).to_string(), "something_went_wrong"),
            callback("photo_removed", self.get(Loc::PhotoRemoved).to_string(), "photo_removed"),
            click("system_permission", "//*[@resource-id='com.android.permissioncontroller:id/grant_dialog']".to_string(), allow.clone()),
            click("media_access", "//*[contains(@text, 'access photos') or contains(@text, 'access your photos')]".to_string(), "//*[@text='Allow' or @text='Allow all' or @text='ALLOW']".to_string()),
            click("camera_microphone_access", "//*[contains(@text, 'access your camera') or contains(@text, 'record audio')]".to_string(), "//*[@text='Allow' or @text='While using the app' or @text='ALLOW']".to_string()),
            click("location_prompt", "//*[contains(@text, 'access this device') and contains(@text, 'location')]".to_string(), "//*[@text=\"Don't allow\" or @text='Deny' or @text=\"DON'T ALLOW\"]".to_string()),
            click("notifications_prompt", self.get(Loc::NotificationsPrompt).to_string(), not_now.clone()),
            click("translation_nag", "//*[contains(@text, 'translations') or contains(@text, 'See translations')]".to_string(), not_now.clone()),
            click("tracker_notice", "//*[contains(@text, 'use cookies') or contains(@text, 'tracking technologies')]".to_string(), "//*[@text='Allow all cookies' or @text='Accept' or @text='OK']".to_string()),
            click("draft_resume", "//*[contains(@text, 'editing your draft') or contains(@text, 'Continue editing')]".to_string(), "//*[@text='Start new video' or @text='Discard' or @text='Start new']".to_string()),
            click("download_permission", "//*[contains(@text, 'download') and contains(@text, 'Allow')]".to_string(), "//*[@text='Allow' or @text='OK']".to_string()),
            click("reels_about_nag", "//*[contains(@text, 'About Reels') or contains(@text, 'longer reels') or contains(@text, 'Reels are now')]".to_string(), self.get(Loc::DialogOk).to_string()),
            click("app_upgrade_nag", "//*[contains(@text, 'Update Instagram') or contains(@text, 'new version of Instagram')]".to_string(), not_now),
        ]
    }
}

fn interpolate(template: &str, package: &str, reel_id_prefix: &str) -> String {
    template
        .replace("{reel_id_prefix}", reel_id_prefix)
        .replace("{package}", package)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_entry_compiles_after_interpolation() {
        let catalog = XpathCatalog::for_package("com.example.ig");
        for (loc, name, _) in ENTRIES {
            let sample = catalog.render(*loc, &[("username", "u1"), ("caption", "hello"), ("text", "Next")]);
            assert!(!sample.contains('{'), "{name} left a placeholder: {sample}");
            xpath::compile(&sample).unwrap_or_else(|err| panic!("{name} failed to compile: {err}"));
        }
    }

    #[test]
    fn names_are_unique_and_round_trip() {
        let mut seen = std::collections::HashSet::new();
        for (loc, name, _) in ENTRIES {
            assert!(seen.insert(*name), "duplicate locator name {name}");
            assert_eq!(Loc::from_name(name), Some(*loc));
        }
        assert_eq!(Loc::HomeFeed.name(), "home_feed");
    }

    #[test]
    fn interpolates_package_at_construction() {
        let catalog = XpathCatalog::for_package("com.example.ig");
        assert!(catalog.get(Loc::TrackRow).contains("com.example.ig:id/track_container"));
        assert_eq!(catalog.package(), "com.example.ig");
    }

    #[test]
    fn reel_prefix_is_parameterized_per_clone() {
        let catalog = XpathCatalog::build("com.instagram.androie", Some("com.instagram.androie:id/"), &HashMap::new())
            .expect("catalog");
        assert!(catalog.get(Loc::ReelThumbnail).contains("'com.instagram.androie:id/'"));
        let default = XpathCatalog::for_package("com.example.ig");
        assert!(default.get(Loc::ReelThumbnail).contains("'com.example.ig:id/'"));
    }

    #[test]
    fn templated_locators_strip_quotes() {
        let catalog = XpathCatalog::for_package("com.example.ig");
        let avatar = catalog.profile_avatar("o'brien");
        assert!(avatar.contains("'obrien'"));
        assert!(xpath::compile(&avatar).is_ok());
    }

    #[test]
    fn overrides_replace_entries_and_are_validated() {
        let mut overrides = HashMap::new();
        overrides.insert("home_feed".to_string(), "//*[@resource-id='{package}:id/tab_home']".to_string());
        let catalog = XpathCatalog::build("com.x", None, &overrides).expect("valid override");
        assert_eq!(catalog.get(Loc::HomeFeed), "//*[@resource-id='com.x:id/tab_home']");

        overrides.insert("no_such_locator".to_string(), "Next".to_string());
        assert!(XpathCatalog::build("com.x", None, &overrides).is_err());

        let mut broken = HashMap::new();
        broken.insert("home_feed".to_string(), "//*[@text=".to_string());
        assert!(XpathCatalog::build("com.x", None, &broken).is_err());
    }

    #[test]
    fn default_popup_rules_have_exactly_one_action() {
        let catalog = XpathCatalog::for_package("com.example.ig");
        for rule in catalog.default_popup_rules() {
            assert!(rule.button_xpath.is_some() ^ rule.callback.is_some(), "{}", rule.name);
            assert!(xpath::compile(&rule.text_xpath).is_ok(), "{}", rule.name);
        }
    }
}
